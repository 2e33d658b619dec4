//! Integration test: running the Processor over a job with no configured
//! NNTP providers. Every file should fail cleanly, no NZB should be written,
//! and source files should stay put.

use postie::config::{Config, JobRequest, PostingConfig};
use postie::par2::NoOpPar2Executor;
use postie::pausable::PausableContext;
use postie::pool::PoolFacade;
use postie::processor::Processor;
use postie::types::{JobId, ObfuscationPolicy};
use std::sync::Arc;

fn test_config(output_dir: std::path::PathBuf) -> Config {
    Config {
        servers: Vec::new(),
        posting: PostingConfig {
            article_size_bytes: 1024,
            groups: vec!["alt.binaries.test".to_string()],
            default_from: "poster@example.com".to_string(),
            message_id_domain: "example.com".to_string(),
            obfuscation_policy: ObfuscationPolicy::None,
            ..Default::default()
        },
        post_check: Default::default(),
        par2: Default::default(),
        watcher: Default::default(),
        queue: Default::default(),
        output_dir,
    }
}

#[tokio::test]
async fn job_with_no_providers_fails_every_file_and_writes_no_nzb() {
    let src_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let file_path = src_dir.path().join("payload.bin");
    std::fs::write(&file_path, vec![7u8; 4096]).unwrap();

    let config = test_config(out_dir.path().to_path_buf());
    let pool = Arc::new(PoolFacade::new(&config.servers).await.unwrap());
    let processor = Processor::new(pool, Arc::new(NoOpPar2Executor), config, None);

    let request = JobRequest { paths: vec![file_path.clone()], priority: 0 };
    let outcome = processor
        .process(JobId::new(), &request, PausableContext::new())
        .await
        .unwrap();

    assert!(outcome.nzb_path.is_none());
    assert!(outcome.outcome.per_file_results.is_empty());
    assert_eq!(outcome.outcome.errors.len(), 1);
    assert!(file_path.exists(), "source file should not be moved when the job produced no output");
}

#[tokio::test]
async fn job_with_no_input_files_is_fatal() {
    let out_dir = tempfile::tempdir().unwrap();
    let missing_dir = tempfile::tempdir().unwrap();
    let empty_subdir = missing_dir.path().join("empty");
    std::fs::create_dir(&empty_subdir).unwrap();

    let config = test_config(out_dir.path().to_path_buf());
    let pool = Arc::new(PoolFacade::new(&config.servers).await.unwrap());
    let processor = Processor::new(pool, Arc::new(NoOpPar2Executor), config, None);

    let request = JobRequest { paths: vec![empty_subdir], priority: 0 };
    let result = processor.process(JobId::new(), &request, PausableContext::new()).await;

    assert!(matches!(result, Err(postie::Error::Fatal(_))));
}
