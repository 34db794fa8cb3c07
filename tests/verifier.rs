mod common;

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use approx::assert_abs_diff_eq;
use common::*;
use image::ImageFormat;
use votegate::config::Config;
use votegate::gallery::GalleryEntry;
use votegate::thumbnail::{Thumbnail, ThumbnailOptions};
use votegate::{Decision, Embedding, Gallery, GateError, SectionMarker, Verifier};

fn entry(identity: &str, values: Vec<f32>) -> GalleryEntry {
    let thumb = Thumbnail::encode(&solid(RED), &ThumbnailOptions::default()).unwrap();
    GalleryEntry::new(identity.to_string(), Embedding::new(values), thumb)
}

fn verifier(entries: Vec<GalleryEntry>, threshold: f32) -> Verifier {
    Verifier::with_gallery(
        Gallery::from_entries(entries),
        Arc::new(ColorExtractor::default()),
        threshold,
        ThumbnailOptions::default(),
    )
}

fn config_for(dir: &std::path::Path) -> Config {
    Config {
        gallery_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

#[test]
fn identical_embedding_is_the_same_person() -> Result<()> {
    let v = verifier(vec![entry("alice.jpg", vec![255.0, 0.0, 0.0])], 0.4);
    let outcome = v.match_image(&encoded(RED, ImageFormat::Png))?;

    assert_eq!(outcome.result.decision, Decision::Same);
    assert_eq!(outcome.result.matched_identity.as_deref(), Some("alice.jpg"));
    assert_abs_diff_eq!(outcome.result.similarity.unwrap(), 1.0, epsilon = 1e-6);
    assert_eq!(
        outcome.message,
        "Same person (similarity=1.000, identity alice.jpg)"
    );

    let preview = outcome.best_match.expect("best match preview");
    assert_eq!(preview.identity, "alice.jpg");
    assert!(preview.thumbnail.starts_with("data:image/jpeg;base64,"));
    assert!(outcome.uploaded_image.is_some());
    Ok(())
}

#[test]
fn orthogonal_embedding_is_different() -> Result<()> {
    let v = verifier(vec![entry("bob.jpg", vec![0.0, 1.0, 0.0])], 0.4);
    let outcome = v.match_image(&encoded(RED, ImageFormat::Png))?;

    assert_eq!(outcome.result.decision, Decision::Different);
    assert_abs_diff_eq!(outcome.result.similarity.unwrap(), 0.0, epsilon = 1e-6);
    assert_eq!(outcome.result.matched_identity.as_deref(), Some("bob.jpg"));
    assert_eq!(outcome.message, "Different people (similarity=0.000)");
    Ok(())
}

#[test]
fn only_a_same_decision_grants_access() -> Result<()> {
    let v = verifier(vec![entry("alice.jpg", vec![1.0, 0.0, 0.0])], 0.4);
    v.match_image(&encoded(RED, ImageFormat::Png))?
        .ensure_granted()?;

    let denied = v.match_image(&encoded(GREEN, ImageFormat::Png))?;
    assert_eq!(denied.result.decision, Decision::Different);
    let err = denied.ensure_granted().unwrap_err();
    assert_eq!(err.to_string(), "Access not granted: Different");

    for raw in [encoded(BLACK, ImageFormat::Png), b"garbage".to_vec()] {
        assert!(v.match_image(&raw)?.ensure_granted().is_err());
    }
    assert!(verifier(vec![], 0.4)
        .match_image(&encoded(RED, ImageFormat::Png))?
        .ensure_granted()
        .is_err());
    Ok(())
}

#[test]
fn similarity_exactly_at_threshold_is_different() -> Result<()> {
    // The red upload scores exactly 1.0; a threshold of 1.0 must not pass it
    let v = verifier(vec![entry("alice.jpg", vec![1.0, 0.0, 0.0])], 1.0);
    let outcome = v.match_image(&encoded(RED, ImageFormat::Png))?;
    assert_eq!(outcome.result.similarity, Some(1.0));
    assert_eq!(outcome.result.decision, Decision::Different);
    Ok(())
}

#[test]
fn empty_gallery_regardless_of_query() -> Result<()> {
    let v = verifier(vec![], 0.4);
    for raw in [
        encoded(RED, ImageFormat::Png),
        encoded(BLACK, ImageFormat::Png),
        b"garbage".to_vec(),
    ] {
        let outcome = v.match_image(&raw)?;
        assert_eq!(outcome.result.decision, Decision::EmptyGallery);
        assert!(outcome.best_match.is_none());
        assert_eq!(
            outcome.message,
            "No reference images in the gallery to compare against."
        );
    }
    Ok(())
}

#[test]
fn undecodable_upload_is_reported() -> Result<()> {
    let v = verifier(vec![entry("alice.jpg", vec![1.0, 0.0, 0.0])], 0.4);
    let outcome = v.match_image(b"\x89PNG but not really")?;
    assert_eq!(outcome.result.decision, Decision::DecodeFailed);
    assert!(outcome.uploaded_image.is_none());
    assert_eq!(outcome.message, "Could not read the uploaded image.");
    Ok(())
}

#[test]
fn faceless_upload_is_reported() -> Result<()> {
    let v = verifier(vec![entry("alice.jpg", vec![1.0, 0.0, 0.0])], 0.4);
    let outcome = v.match_image(&encoded(BLACK, ImageFormat::Png))?;
    assert_eq!(outcome.result.decision, Decision::NoFace);
    assert!(outcome.result.similarity.is_none());
    assert!(outcome.uploaded_image.is_some());
    Ok(())
}

#[test]
fn extractor_fault_is_an_error() {
    let v = Verifier::with_gallery(
        Gallery::from_entries(vec![entry("alice.jpg", vec![1.0, 0.0, 0.0])]),
        Arc::new(BrokenExtractor),
        0.4,
        ThumbnailOptions::default(),
    );
    assert!(v.match_image(&encoded(RED, ImageFormat::Png)).is_err());
}

#[test]
fn section_is_required() -> Result<()> {
    let v = verifier(vec![entry("alice.jpg", vec![1.0, 0.0, 0.0])], 0.4);
    let raw = encoded(RED, ImageFormat::Png);

    assert!(matches!(
        v.verify(None, &raw),
        Err(GateError::SectionRequired)
    ));

    let section = SectionMarker::new("7");
    let outcome = v.verify(Some(&section), &raw).map_err(anyhow::Error::from)?;
    assert_eq!(outcome.result.decision, Decision::Same);
    Ok(())
}

#[test]
fn end_to_end_from_directory() -> Result<()> {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir()?;
    write_image(dir.path(), "alice.png", RED, ImageFormat::Png);
    write_image(dir.path(), "bob.png", GREEN, ImageFormat::Png);
    write_image(dir.path(), "twin.png", RED, ImageFormat::Png);

    let v = Verifier::new(&config_for(dir.path()), Arc::new(ColorExtractor::default()))?;
    assert_eq!(v.gallery_size(), 3);
    assert_eq!(v.load_report().loaded, 3);

    // alice.png and twin.png tie; the first in scan order wins
    let outcome = v.match_image(&encoded(RED, ImageFormat::Png))?;
    assert_eq!(outcome.result.matched_identity.as_deref(), Some("alice.png"));
    assert_eq!(outcome.result.decision, Decision::Same);

    let outcome = v.match_image(&encoded(BLUE, ImageFormat::Png))?;
    assert_eq!(outcome.result.decision, Decision::Different);
    Ok(())
}

#[test]
fn missing_gallery_dir_is_created() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let gallery_dir = dir.path().join("media").join("uploads");
    let v = Verifier::new(&config_for(&gallery_dir), Arc::new(ColorExtractor::default()))?;
    assert!(gallery_dir.is_dir());
    assert_eq!(v.gallery_size(), 0);

    let outcome = v.match_image(&encoded(RED, ImageFormat::Png))?;
    assert_eq!(outcome.result.decision, Decision::EmptyGallery);
    Ok(())
}

#[test]
fn missing_gallery_dir_without_create_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        create_gallery_dir: false,
        ..config_for(&dir.path().join("absent"))
    };
    assert!(Verifier::new(&cfg, Arc::new(ColorExtractor::default())).is_err());
}

#[test]
fn compare_two_uploads() -> Result<()> {
    let v = verifier(vec![], 0.4);
    let red = encoded(RED, ImageFormat::Png);
    let green = encoded(GREEN, ImageFormat::Png);

    let same = v.compare(&red, &red)?;
    assert_eq!(same.decision, Decision::Same);
    assert_eq!(same.matched_identity, None);
    assert_eq!(same.message(), "Same person (similarity=1.000)");

    assert_eq!(v.compare(&red, &green)?.decision, Decision::Different);
    assert_eq!(
        v.compare(&red, &encoded(BLACK, ImageFormat::Png))?.decision,
        Decision::NoFace
    );
    assert_eq!(v.compare(&red, b"nope")?.decision, Decision::DecodeFailed);
    Ok(())
}

#[test]
fn concurrent_queries_agree() -> Result<()> {
    let v = Arc::new(verifier(
        vec![
            entry("alice.jpg", vec![1.0, 0.0, 0.0]),
            entry("bob.jpg", vec![0.0, 1.0, 0.0]),
        ],
        0.4,
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let v = Arc::clone(&v);
            thread::spawn(move || {
                let color = if i % 2 == 0 { RED } else { GREEN };
                v.match_image(&encoded(color, ImageFormat::Png))
                    .map(|o| (i, o.result.matched_identity))
            })
        })
        .collect();

    for handle in handles {
        let (i, identity) = handle.join().expect("worker panicked")?;
        let expected = if i % 2 == 0 { "alice.jpg" } else { "bob.jpg" };
        assert_eq!(identity.as_deref(), Some(expected));
    }
    Ok(())
}

#[test]
fn outcome_serializes_for_rendering() -> Result<()> {
    let v = verifier(vec![entry("alice.jpg", vec![1.0, 0.0, 0.0])], 0.4);
    let outcome = v.match_image(&encoded(RED, ImageFormat::Png))?;
    let json = serde_json::to_value(&outcome)?;
    assert_eq!(json["result"]["decision"], "SAME");
    assert_eq!(json["best_match"]["identity"], "alice.jpg");
    assert!(json["message"].as_str().unwrap().starts_with("Same person"));
    Ok(())
}
