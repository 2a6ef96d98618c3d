use std::fs;

use docroute::config::load_config;

#[test]
fn test_load_config_from_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("docroute.toml");
    fs::write(
        &path,
        r#"
[chunking]
max_tokens = 512
overlap_tokens = 32

[retrieval]
top_k = 8
rerank_top_n = 4
similarity_cutoff = 0.2
default_tool = "summary"

[provider]
kind = "local"
embedding_model = "bge-small-en-v1.5"
base_url = "http://localhost:11434/v1"
chat_model = "llama3"

[rerank]
kind = "local"

[agent]
max_tool_calls = 3

[server]
bind = "0.0.0.0:9000"
"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.provider.resolved_dims(), Some(384));
    assert_eq!(config.retrieval.default_tool, "summary");

    let rag = config.rag();
    assert_eq!(rag.max_tokens, 512);
    assert_eq!(rag.overlap_tokens, 32);
    assert_eq!(rag.top_k, 8);
    assert_eq!(rag.rerank_top_n, Some(4));
    assert_eq!(rag.similarity_cutoff, Some(0.2));
    assert_eq!(config.agent().max_tool_calls, 3);
    assert_eq!(config.server.bind, "0.0.0.0:9000");
}

#[test]
fn test_missing_config_file_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let err = load_config(&tmp.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_malformed_config_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bad.toml");
    fs::write(&path, "[chunking\nmax_tokens = ").unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}
