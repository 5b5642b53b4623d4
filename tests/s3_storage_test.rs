#![cfg(feature = "s3")]

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use httpmock::prelude::*;
use httpmock::Method::HEAD;
use site_geometry::adapters::S3ObjectStore;
use site_geometry::core::ObjectStore;
use tempfile::TempDir;

fn store_for(server: &MockServer) -> S3ObjectStore {
    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("eu-west-2"))
        .credentials_provider(Credentials::new("test", "test", None, None, "static"))
        .endpoint_url(server.base_url())
        .force_path_style(true)
        .build();
    S3ObjectStore::new(aws_sdk_s3::Client::from_conf(config))
}

#[tokio::test]
async fn test_download_streams_object_to_disk() {
    let server = MockServer::start();
    let get = server.mock(|when, then| {
        when.method(GET).path("/uploads/app-1/site.kml");
        then.status(200)
            .header("content-type", "application/vnd.google-earth.kml+xml")
            .body("<kml></kml>");
    });

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("upload.kml");
    let written = store_for(&server)
        .download_to("uploads", "app-1/site.kml", &dest)
        .await
        .unwrap();

    get.assert();
    assert_eq!(written, 11);
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "<kml></kml>");
}

#[tokio::test]
async fn test_missing_object_is_storage_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(HEAD).path("/uploads/absent.kml");
        then.status(404);
    });

    let err = store_for(&server)
        .object_size("uploads", "absent.kml")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORAGE_ERROR");
    assert!(err.to_string().contains("s3://uploads/absent.kml"));
}
