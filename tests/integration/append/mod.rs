//! Successful appends, checked from the registry's point of view.

use crate::integration::common::{
    created, seed_base_image, seed_oci_image, BASE_IMAGE, TARGET_IMAGE,
};
use anyhow::Result;
use flate2::read::GzDecoder;
use oci_append::digest::{hex_part, sha256_digest};
use oci_append::registry::RegistryOperation;
use oci_append::{ImageAppender, ImageConfig, Manifest, MemoryRegistry, Notifier};
use serde_json::Value;
use std::fs;
use std::io::Read;
use tar_rs as tar;
use tempfile::TempDir;

const SCRIPT: &[u8] = b"print('Hello World!')";

fn appender_with_base() -> ImageAppender<MemoryRegistry> {
    let registry = MemoryRegistry::new();
    seed_base_image(&registry, "latest");
    ImageAppender::new(registry, Notifier::plain())
}

#[test]
fn test_append_single_file_scenario() -> Result<()> {
    let registry = MemoryRegistry::new();
    let seeded = seed_base_image(&registry, "latest");
    let appender = ImageAppender::new(registry, Notifier::plain());

    let outcome = appender.append_file(BASE_IMAGE, TARGET_IMAGE, "hello_world.py", SCRIPT, created())?;
    let registry = appender.client();

    assert_eq!(outcome.target.to_string(), TARGET_IMAGE);
    assert_eq!(outcome.layer_count, 2);

    let manifest_bytes = registry.manifest("new-tag-lol").expect("new tag should exist");
    assert_eq!(outcome.manifest_digest, sha256_digest(&manifest_bytes));
    let manifest: Value = serde_json::from_slice(&manifest_bytes)?;

    let config_digest = manifest["config"]["digest"].as_str().unwrap();
    assert_eq!(config_digest, outcome.config_digest);
    let config_bytes = registry.blob(config_digest).expect("config blob should be stored");
    assert_eq!(
        manifest["config"]["size"].as_u64().unwrap(),
        config_bytes.len() as u64
    );
    let config: Value = serde_json::from_slice(&config_bytes)?;

    // Two layers, two diff_ids, one history entry.
    let layers = manifest["layers"].as_array().unwrap();
    let diff_ids = config["rootfs"]["diff_ids"].as_array().unwrap();
    let history = config["history"].as_array().unwrap();
    assert_eq!(layers.len(), 2);
    assert_eq!(diff_ids.len(), 2);
    assert_eq!(history.len(), 1);

    // Earlier entries are untouched.
    assert_eq!(layers[0], seeded.manifest["layers"][0]);
    assert_eq!(diff_ids[0], seeded.config["rootfs"]["diff_ids"][0]);
    assert_eq!(config["config"], seeded.config["config"]);
    assert_eq!(config["architecture"], "amd64");

    // The new entries describe the new layer.
    assert_eq!(layers[1]["digest"], outcome.layer_digest.as_str());
    assert_eq!(
        layers[1]["mediaType"],
        "application/vnd.docker.image.rootfs.diff.tar.gzip"
    );
    assert_eq!(diff_ids[1], outcome.diff_id.as_str());
    assert_eq!(
        history[0]["created_by"],
        format!(
            "#(nop) COPY file:{} in /hello_world.py",
            hex_part(&outcome.diff_id).unwrap()
        )
        .as_str()
    );

    // The base tag still resolves to the original manifest.
    assert_eq!(registry.manifest("latest").unwrap(), seeded.manifest_bytes);
    Ok(())
}

#[test]
fn test_pushed_layer_unpacks_to_the_file() -> Result<()> {
    let appender = appender_with_base();
    let outcome = appender.append_file(BASE_IMAGE, TARGET_IMAGE, "/app/hello_world.py", SCRIPT, created())?;

    let blob = appender
        .client()
        .blob(&outcome.layer_digest)
        .expect("layer blob should be stored");
    assert_eq!(sha256_digest(&blob), outcome.layer_digest);

    let mut tarball = Vec::new();
    GzDecoder::new(blob.as_slice()).read_to_end(&mut tarball)?;
    assert_eq!(sha256_digest(&tarball), outcome.diff_id);

    let rootfs = TempDir::new()?;
    tar::Archive::new(tarball.as_slice()).unpack(rootfs.path())?;
    assert_eq!(fs::read(rootfs.path().join("app/hello_world.py"))?, SCRIPT);
    Ok(())
}

#[test]
fn test_registry_sees_blobs_before_manifest() -> Result<()> {
    let appender = appender_with_base();
    let outcome = appender.append_file(BASE_IMAGE, TARGET_IMAGE, "hello_world.py", SCRIPT, created())?;
    let operations = appender.client().operations();

    let base_config = Manifest::from_slice(&appender.client().manifest("latest").unwrap())?
        .config
        .digest;
    assert_eq!(
        operations,
        vec![
            RegistryOperation::GetManifest("latest".to_string()),
            RegistryOperation::PullBlob(base_config),
            RegistryOperation::PushBlob {
                digest: outcome.layer_digest.clone(),
                stored: true
            },
            RegistryOperation::PushBlob {
                digest: outcome.config_digest.clone(),
                stored: true
            },
            RegistryOperation::SetManifest("new-tag-lol".to_string()),
        ]
    );

    // Base layers are referenced, never re-uploaded.
    let seeded_layer = Manifest::from_slice(&appender.client().manifest("latest").unwrap())?
        .layers[0]
        .digest
        .clone();
    assert!(!operations.iter().any(|op| matches!(
        op,
        RegistryOperation::PushBlob { digest, .. } if *digest == seeded_layer
    )));
    Ok(())
}

#[test]
fn test_rerunning_an_append_is_idempotent() -> Result<()> {
    let appender = appender_with_base();
    let first = appender.append_file(BASE_IMAGE, TARGET_IMAGE, "hello_world.py", SCRIPT, created())?;
    let blobs_after_first = appender.client().blob_count();
    let manifest_after_first = appender.client().manifest("new-tag-lol").unwrap();

    let second = appender.append_file(BASE_IMAGE, TARGET_IMAGE, "hello_world.py", SCRIPT, created())?;

    assert_eq!(first.manifest_digest, second.manifest_digest);
    assert_eq!(appender.client().blob_count(), blobs_after_first);
    assert_eq!(
        appender.client().manifest("new-tag-lol").unwrap(),
        manifest_after_first
    );

    let repeated_pushes = appender
        .client()
        .operations()
        .into_iter()
        .filter(|op| matches!(op, RegistryOperation::PushBlob { stored: false, .. }))
        .count();
    assert_eq!(repeated_pushes, 2);
    Ok(())
}

#[test]
fn test_appending_on_top_of_an_appended_image() -> Result<()> {
    let appender = appender_with_base();
    let first = appender.append_file(
        BASE_IMAGE,
        "localhost:5000/my-alpine:step-1",
        "one.txt",
        b"1",
        created(),
    )?;
    let second = appender.append_file(
        "localhost:5000/my-alpine:step-1",
        "localhost:5000/my-alpine:step-2",
        "two.txt",
        b"2",
        created(),
    )?;
    assert_eq!(second.layer_count, 3);

    let manifest = Manifest::from_slice(&appender.client().manifest("step-2").unwrap())?;
    let config = ImageConfig::from_slice(&appender.client().blob(&manifest.config.digest).unwrap())?;
    let layer_digests: Vec<_> = manifest.layers.iter().map(|l| l.digest.clone()).collect();
    assert_eq!(layer_digests[1..], [first.layer_digest, second.layer_digest.clone()]);
    assert_eq!(
        config.rootfs.diff_ids[1..],
        [first.diff_id, second.diff_id]
    );
    assert_eq!(config.history.len(), 2);
    Ok(())
}

#[test]
fn test_oci_base_keeps_oci_media_types() -> Result<()> {
    let registry = MemoryRegistry::new();
    seed_oci_image(&registry, "latest");
    let appender = ImageAppender::new(registry, Notifier::plain());

    appender.append_file(BASE_IMAGE, TARGET_IMAGE, "hello_world.py", SCRIPT, created())?;

    let manifest = Manifest::from_slice(&appender.client().manifest("new-tag-lol").unwrap())?;
    assert_eq!(
        manifest.media_type.as_deref(),
        Some("application/vnd.oci.image.manifest.v1+json")
    );
    assert_eq!(
        manifest.config.media_type,
        "application/vnd.oci.image.config.v1+json"
    );
    assert!(manifest
        .layers
        .iter()
        .all(|l| l.media_type == "application/vnd.oci.image.layer.v1.tar+gzip"));
    Ok(())
}
