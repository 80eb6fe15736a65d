//! Appends that must stop, and how far they get before stopping.

use crate::integration::common::{created, seed_base_image, BASE_IMAGE, TARGET_IMAGE};
use oci_append::digest::sha256_digest;
use oci_append::registry::RegistryOperation;
use oci_append::{AppendError, ImageAppender, MemoryRegistry, Notifier};
use serde_json::json;

fn appender_with_base() -> ImageAppender<MemoryRegistry> {
    let registry = MemoryRegistry::new();
    seed_base_image(&registry, "latest");
    ImageAppender::new(registry, Notifier::plain())
}

fn append_error(
    appender: &ImageAppender<MemoryRegistry>,
    base: &str,
    target: &str,
) -> AppendError {
    let err = appender
        .append_file(base, target, "hello_world.py", b"x", created())
        .expect_err("append should fail");
    err.downcast_ref::<AppendError>()
        .cloned()
        .unwrap_or_else(|| panic!("expected an AppendError, got: {err:#}"))
}

#[test]
fn test_same_tag_fails_before_any_registry_call() {
    let appender = appender_with_base();
    let err = append_error(&appender, BASE_IMAGE, BASE_IMAGE);

    assert_eq!(
        err,
        AppendError::TagUnchanged {
            tag: "latest".to_string()
        }
    );
    assert!(err.is_input_error());
    assert!(appender.client().operations().is_empty());
}

#[test]
fn test_other_repository_fails_before_any_registry_call() {
    let appender = appender_with_base();
    for target in [
        "localhost:5000/other-image:new-tag",
        "registry.example.com/my-alpine:new-tag",
    ] {
        let err = append_error(&appender, BASE_IMAGE, target);
        assert!(matches!(err, AppendError::RepositoryMismatch { .. }), "{target}");
    }
    assert!(appender.client().operations().is_empty());
}

#[test]
fn test_reference_without_tag_fails_before_any_registry_call() {
    let appender = appender_with_base();
    let err = append_error(&appender, "localhost:5000/my-alpine", TARGET_IMAGE);
    assert!(matches!(err, AppendError::InvalidReference { .. }));
    assert!(appender.client().operations().is_empty());
}

#[test]
fn test_manifest_list_is_rejected_without_pushing() {
    let registry = MemoryRegistry::new();
    let index = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
        "manifests": [{
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "size": 528,
            "digest": sha256_digest(b"amd64 manifest"),
            "platform": { "architecture": "amd64", "os": "linux" }
        }]
    });
    registry.insert_manifest("latest", &serde_json::to_vec(&index).unwrap());
    let appender = ImageAppender::new(registry, Notifier::plain());

    let err = append_error(&appender, BASE_IMAGE, TARGET_IMAGE);
    assert!(matches!(err, AppendError::UnsupportedManifest(_)));
    assert_eq!(
        appender.client().operations(),
        vec![RegistryOperation::GetManifest("latest".to_string())]
    );
}

#[test]
fn test_missing_config_blob_stops_before_pushing() {
    let registry = MemoryRegistry::new();
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 10,
            "digest": sha256_digest(b"never pushed")
        },
        "layers": []
    });
    registry.insert_manifest("latest", &serde_json::to_vec(&manifest).unwrap());
    let appender = ImageAppender::new(registry, Notifier::plain());

    let err = append_error(&appender, BASE_IMAGE, TARGET_IMAGE);
    assert!(matches!(err, AppendError::BlobUnknown(_)));
    assert!(!appender
        .client()
        .operations()
        .iter()
        .any(|op| matches!(op, RegistryOperation::PushBlob { .. } | RegistryOperation::SetManifest(_))));
}

#[test]
fn test_inconsistent_base_is_not_extended() {
    let registry = MemoryRegistry::new();
    let config = serde_json::to_vec(&json!({
        "rootfs": { "type": "layers", "diff_ids": [] },
        "history": []
    }))
    .unwrap();
    let config_digest = registry.insert_blob(&config);
    let layer_digest = registry.insert_blob(b"orphan layer");
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": config.len(),
            "digest": config_digest
        },
        "layers": [{
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": 12,
            "digest": layer_digest
        }]
    });
    registry.insert_manifest("latest", &serde_json::to_vec(&manifest).unwrap());
    let appender = ImageAppender::new(registry, Notifier::plain());

    let err = append_error(&appender, BASE_IMAGE, TARGET_IMAGE);
    assert_eq!(
        err,
        AppendError::LayerCountMismatch {
            layers: 1,
            diff_ids: 0
        }
    );
    assert!(appender.client().manifest("new-tag-lol").is_none());
}
