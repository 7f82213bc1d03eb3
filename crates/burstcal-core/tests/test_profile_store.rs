mod common;

use burstcal_core::error::BurstcalError;
use burstcal_core::profile::{FrameFormat, FrameOrder, PipelinePolicy, ProfileStore};

use common::{shared_sections, Fixture};

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[test]
fn test_load_active_profile() {
    let fx = Fixture::new();
    let path = fx.write_config(&[fx.profile_toml("ZYLA", 64, "")]);
    let store = ProfileStore::load(&path).unwrap();

    let zyla = store.get("ZYLA").unwrap();
    assert!(zyla.is_active());
    assert_eq!(zyla.burst_number, 64);
    assert_eq!(zyla.frame_format, FrameFormat::Raw16);
    assert_eq!(zyla.frame_order, FrameOrder::Name);
    assert_eq!(zyla.frame_shape, Some((common::HEIGHT, common::WIDTH)));
    assert_eq!(zyla.wavelength_nm, Some(656.3));
    assert_eq!(zyla.bursts_per_batch, None);
    assert_eq!(zyla.method.max_iter, 30);
    assert!(zyla.method.noise_filter);
    assert_eq!(store.env.nproc, 4);
    assert!(store.props.ao_used.is_set());
}

#[test]
fn test_lookup_is_case_insensitive_for_upper_case_sections() {
    let fx = Fixture::new();
    let store = ProfileStore::from_toml_str(&fx.config(&[fx.profile_toml("ZYLA", 64, "")])).unwrap();
    assert_eq!(store.get("zyla").unwrap().name, "ZYLA");
}

#[test]
fn test_unknown_profile() {
    let fx = Fixture::new();
    let store = ProfileStore::from_toml_str(&fx.config(&[fx.profile_toml("ZYLA", 64, "")])).unwrap();
    let err = store.get("ROSA_GBAND").unwrap_err();
    assert!(matches!(err, BurstcalError::UnknownProfile(name) if name == "ROSA_GBAND"));
}

#[test]
fn test_profile_overrides_shared_method_parameters() {
    let fx = Fixture::new();
    let profile = fx.profile_toml("ZYLA", 64, "kisipMethodMaxIter = 50");
    let store = ProfileStore::from_toml_str(&fx.config(&[profile])).unwrap();
    assert_eq!(store.get("ZYLA").unwrap().method.max_iter, 50);
}

#[test]
fn test_bursts_per_batch_and_frame_order() {
    let fx = Fixture::new();
    let profile = fx.profile_toml(
        "ZYLA",
        64,
        "burstsPerBatch = 1000\nframeOrder = \"reversedDigits\"",
    );
    let store = ProfileStore::from_toml_str(&fx.config(&[profile])).unwrap();
    let zyla = store.get("ZYLA").unwrap();
    assert_eq!(zyla.bursts_per_batch, Some(1000));
    assert_eq!(zyla.frame_order, FrameOrder::ReversedDigits);
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

#[test]
fn test_empty_directories_make_profile_inactive() {
    let fx = Fixture::new();
    let doc = format!(
        "{}\n[ROSA_CAII]\ndarkBase = \"\"\ndataBase = \"\"\nflatBase = \"\"\nworkBase = \"\"\n\
         burstNumber = 64\nkisipArcsecPerPixX = 0.17\nkisipArcsecPerPixY = 0.17\n\
         kisipMethodSubfieldArcsec = 8.0\n",
        shared_sections(fx.root.path())
    );
    let store = ProfileStore::from_toml_str(&doc).unwrap();
    let rosa = store.get("ROSA_CAII").unwrap();
    assert!(!rosa.is_active());
    assert!(rosa.empty_fields().contains(&"dataBase"));
    assert!(rosa.burst_form.is_none());
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn test_bad_profile_does_not_block_others() {
    let fx = Fixture::new();
    let good = fx.profile_toml("ZYLA", 64, "");
    let bad = fx.profile_toml("ROSA_GBAND", 0, "");
    let store = ProfileStore::from_toml_str(&fx.config(&[good, bad])).unwrap();

    assert!(store.get("ZYLA").is_ok());
    match store.get("ROSA_GBAND").unwrap_err() {
        BurstcalError::ProfileValidation(e) => {
            assert_eq!(e.profile, "ROSA_GBAND");
            assert_eq!(e.field, "burstNumber");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.names(), vec!["ROSA_GBAND".to_string(), "ZYLA".to_string()]);
    assert_eq!(store.rejected().count(), 1);
}

#[test]
fn test_missing_directory_is_rejected() {
    let fx = Fixture::new();
    let profile = fx
        .profile_toml("ZYLA", 64, "")
        .replace(&fx.data.display().to_string(), "/nonexistent/burstcal/data");
    let store = ProfileStore::from_toml_str(&fx.config(&[profile])).unwrap();
    match store.get("ZYLA").unwrap_err() {
        BurstcalError::ProfileValidation(e) => assert_eq!(e.field, "dataBase"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_template_without_trailing_index_is_rejected() {
    let fx = Fixture::new();
    let profile = fx.profile_toml("ZYLA", 64, "").replace(
        common::BURST_FORM,
        "{0:s}_{1:s}.{3:03d}.batch.{2:02d}",
    );
    let store = ProfileStore::from_toml_str(&fx.config(&[profile])).unwrap();
    match store.get("ZYLA").unwrap_err() {
        BurstcalError::ProfileValidation(e) => assert_eq!(e.field, "burstFileForm"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_shared_section_is_fatal() {
    let err = ProfileStore::from_toml_str("[ZYLA]\nburstNumber = 64\n").unwrap_err();
    assert!(matches!(err, BurstcalError::Config(_)));
}

#[test]
fn test_pipeline_section_defaults_and_overrides() {
    let fx = Fixture::new();
    let store = ProfileStore::from_toml_str(&fx.config(&[])).unwrap();
    assert_eq!(store.policy, PipelinePolicy::default());
    assert_eq!(store.policy.max_concurrent_jobs, 1);

    let doc = format!(
        "{}\n[PIPELINE]\nmaxConcurrentJobs = 3\nmaxRetries = 2\n",
        fx.config(&[])
    );
    let store = ProfileStore::from_toml_str(&doc).unwrap();
    assert_eq!(store.policy.max_concurrent_jobs, 3);
    assert_eq!(store.policy.max_retries, 2);

    let doc = format!("{}\n[PIPELINE]\nmaxConcurrentJobs = 0\n", fx.config(&[]));
    assert!(ProfileStore::from_toml_str(&doc).is_err());
}
