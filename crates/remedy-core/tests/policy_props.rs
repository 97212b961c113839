//! Property tests for the safety policy: no fix result may ever report a
//! modified file under a protected prefix, whatever the generated
//! combination of protected paths and targets.

use proptest::prelude::*;
use remedy_core::{AnalysisResult, Fixer, FixStrategy, FixSuggestion, SafetyPolicy};
use std::path::PathBuf;
use std::time::Duration;

const ZONES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn modified_files_never_touch_protected_prefixes(
        protected_mask in proptest::collection::vec(any::<bool>(), 4),
        target_zone in 0usize..4,
        content in "[a-z #\n]{0,64}",
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let mut protected_paths = Vec::new();
            for (zone, flagged) in ZONES.iter().zip(&protected_mask) {
                std::fs::create_dir_all(dir.path().join(zone)).unwrap();
                if *flagged {
                    protected_paths.push(dir.path().join(zone));
                }
            }
            let target = dir.path().join(ZONES[target_zone]).join("artifact.sh");
            std::fs::write(&target, "echo original\n").unwrap();

            let policy = SafetyPolicy {
                protected_paths: protected_paths.clone(),
                ..SafetyPolicy::default()
            };
            let fixer = Fixer::new(
                policy.clone(),
                dir.path().join("backups"),
                Duration::from_secs(5),
            );
            let suggestion =
                FixSuggestion::new("patch", "property fixture", 0.9, FixStrategy::PatchFile)
                    .with_target_file(&target)
                    .with_content(content);
            let analysis = AnalysisResult {
                root_cause: "property fixture".to_string(),
                suggestions: Vec::new(),
            };

            let result = fixer.apply(&suggestion, &analysis, None).await.unwrap();
            for file in &result.modified_files {
                prop_assert!(
                    !policy.is_path_protected(file),
                    "modified protected file {file:?} with protected set {protected_paths:?}"
                );
            }
            // When the target zone was protected, nothing may have changed.
            if protected_mask[target_zone] {
                prop_assert!(!result.applied);
                prop_assert_eq!(
                    std::fs::read_to_string(&target).unwrap(),
                    "echo original\n".to_string()
                );
            }
            Ok(())
        })?;
    }
}

#[test]
fn prefix_protection_is_not_substring_matching() {
    let policy = SafetyPolicy {
        protected_paths: vec![PathBuf::from("/srv/data")],
        ..SafetyPolicy::default()
    };
    assert!(policy.is_path_protected(std::path::Path::new("/srv/data/live.db")));
    assert!(!policy.is_path_protected(std::path::Path::new("/srv/database/live.db")));
}
