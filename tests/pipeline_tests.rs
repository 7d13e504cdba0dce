//! End-to-end runs over a small audio library against a mock provider

use serde_json::json;
use std::path::Path;

use sfx_translator::core::config::{PollPolicy, RetryPolicy};
use sfx_translator::core::store::MappingStore;
use sfx_translator::processors::orchestrator::{PresetAnswer, RunTiming};
use sfx_translator::processors::renamer::{regenerate_mapping, rename_to_translations, restore_originals};
use sfx_translator::processors::structure::Structure;
use sfx_translator::{Orchestrator, ProviderRegistry, RunOptions, RunOutcome, TranslationClient, TranslationContext};

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

fn completion(content: &str) -> String {
    json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]}).to_string()
}

fn timing() -> RunTiming {
    RunTiming {
        rate_limit_delay: std::time::Duration::ZERO,
        poll: PollPolicy {
            interval: std::time::Duration::ZERO,
            max_attempts: 1,
        },
        output_tokens_per_entry: 20,
    }
}

fn registry(url: &str, client_type: &str) -> ProviderRegistry {
    ProviderRegistry::from_json(
        &json!({
            "default_provider": "mock",
            "common_settings": {"temperature": 0.3},
            "providers": {
                "mock": {
                    "name": "Mock Provider",
                    "api_url": url,
                    "api_key": "sk-test-0000000000",
                    "client_type": client_type,
                    "models": [{"id": "gpt-3.5-turbo", "name": "GPT 3.5"}],
                    "default_model": "gpt-3.5-turbo"
                }
            }
        })
        .to_string(),
    )
    .unwrap()
}

/// Library with fixed ids so the mock can answer for them
fn library(root: &Path, json_dir: &Path) -> Structure {
    touch(root, "Doors/DOORWood_Open 01.wav");
    touch(root, "Doors/DOORWood_Open 02.wav");
    touch(root, "Rain.flac");

    let structure: Structure = serde_json::from_value(json!({
        "Doors": {
            "DOORWood_Open 01.wav": {"id": "door-1", "ext": ".wav"},
            "DOORWood_Open 02.wav": {"id": "door-2", "ext": ".wav"}
        },
        "Rain.flac": {"id": "rain", "ext": ".flac"}
    }))
    .unwrap();

    structure.save(&json_dir.join("structure.json")).unwrap();
    MappingStore::new(json_dir.join("mapping.json"))
        .save(&structure.index().to_mapping())
        .unwrap();
    structure
}

#[tokio::test]
async fn test_translate_rename_restore_cycle() {
    let library_dir = tempfile::tempdir().unwrap();
    let json_dir = tempfile::tempdir().unwrap();
    let structure = library(library_dir.path(), json_dir.path());
    let store = MappingStore::new(json_dir.path().join("mapping.json"));

    let mut server = mockito::Server::new_async().await;
    let provider = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(completion(
            &json!({"result": {"door-1": "门_木制_打开_01", "door-2": "门_木制_打开_02", "rain": "雨"}}).to_string(),
        ))
        .expect(2)
        .create_async()
        .await;

    let config = registry(&server.url(), "openai")
        .get_provider_config("mock", None)
        .unwrap();
    assert!((config.temperature - 0.3).abs() < f64::EPSILON);
    let client = TranslationClient::new(config, RetryPolicy::immediate()).unwrap();

    let mut orchestrator = Orchestrator::new(
        TranslationContext::new(client, None, 1),
        store.clone(),
        RunOptions::default(),
        timing(),
    );
    let outcome = orchestrator.run(&mut PresetAnswer(true)).await.unwrap();

    let RunOutcome::Completed(summary) = outcome else {
        panic!("run did not complete");
    };
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.entries, 3);
    assert!(summary.failed_batches.is_empty());
    provider.assert_async().await;

    let mapping = store.load().unwrap();
    assert_eq!(mapping.translated_count(), 3);

    let index = structure.index();
    let renamed = rename_to_translations(library_dir.path(), &index, &mapping);
    assert_eq!(renamed.renamed, 3);
    assert!(library_dir.path().join("Doors/门_木制_打开_02.wav").is_file());
    assert!(library_dir.path().join("雨.flac").is_file());

    let restored = restore_originals(library_dir.path(), &index, &mapping);
    assert_eq!(restored.renamed, 3);
    assert!(library_dir.path().join("Doors/DOORWood_Open 01.wav").is_file());
    assert!(library_dir.path().join("Rain.flac").is_file());

    let regenerated = regenerate_mapping(&index, &mapping);
    assert_eq!(regenerated, mapping);
}

#[tokio::test]
async fn test_chatty_raw_http_provider() {
    let library_dir = tempfile::tempdir().unwrap();
    let json_dir = tempfile::tempdir().unwrap();
    library(library_dir.path(), json_dir.path());
    let store = MappingStore::new(json_dir.path().join("mapping.json"));

    let mut server = mockito::Server::new_async().await;
    let _provider = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(completion(
            "Sure! Here are the translations:\n{\"door-1\": \"门_01\", \"door-2\": \"门_02\", \"rain\": \"雨\", \"extra\": \"多余\"}\nHope this helps.",
        ))
        .create_async()
        .await;

    let config = registry(&server.url(), "siliconflow")
        .get_provider_config("mock", Some("gpt-3.5-turbo"))
        .unwrap();
    let client = TranslationClient::new(config, RetryPolicy::immediate()).unwrap();
    assert!(!client.supports_batch());

    let options = RunOptions {
        use_batch_api: true,
        ..Default::default()
    };
    let mut orchestrator = Orchestrator::new(TranslationContext::new(client, None, 1), store.clone(), options, timing());

    let outcome = tokio_test::assert_ok!(orchestrator.run(&mut PresetAnswer(true)).await);
    let RunOutcome::Completed(summary) = outcome else {
        panic!("run did not complete");
    };

    assert!(summary.unmatched.iter().all(|id| id == "extra"));
    assert!(!summary.unmatched.is_empty());
    assert_eq!(store.load().unwrap().get("rain").unwrap().translation, "雨");
    assert!(!store.load().unwrap().contains("extra"));
}

#[tokio::test]
async fn test_unreachable_provider_leaves_entries_pending() {
    let library_dir = tempfile::tempdir().unwrap();
    let json_dir = tempfile::tempdir().unwrap();
    library(library_dir.path(), json_dir.path());
    let store = MappingStore::new(json_dir.path().join("mapping.json"));

    let mut server = mockito::Server::new_async().await;
    let _provider = server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body(r#"{"error": "invalid key"}"#)
        .create_async()
        .await;

    let config = registry(&server.url(), "openai")
        .get_provider_config("mock", None)
        .unwrap();
    let client = TranslationClient::new(config, RetryPolicy::immediate()).unwrap();
    let mut orchestrator = Orchestrator::new(
        TranslationContext::new(client, None, 3),
        store.clone(),
        RunOptions::default(),
        timing(),
    );

    let RunOutcome::Completed(summary) = orchestrator.run(&mut PresetAnswer(true)).await.unwrap() else {
        panic!("run did not complete");
    };

    assert_eq!(summary.failed_batches, vec![0, 1]);
    assert_eq!(store.load().unwrap().translated_count(), 0);
}
