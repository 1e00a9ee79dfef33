//! Built-in baseline catalog, served when no remote source or cache is available

use chrono::Utc;

use crate::types::{CatalogEntry, CatalogOrigin, CatalogSnapshot, DownloadMirror, MirrorKind, MirrorLocation};

pub const EMBEDDED_CATALOG_VERSION: &str = "1.0.0";

pub fn embedded_catalog() -> CatalogSnapshot {
    let now = Utc::now();
    CatalogSnapshot {
        version: EMBEDDED_CATALOG_VERSION.to_string(),
        updated_at: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        entries: vec![phi_2(), tinyllama_chat()],
        fetched_at: now,
        origin: CatalogOrigin::Embedded,
    }
}

fn phi_2() -> CatalogEntry {
    CatalogEntry {
        id: "phi2".to_string(),
        name: "Phi-2".to_string(),
        description: "Microsoft's compact 2.7B model, good at conversation and code".to_string(),
        version: "1.0.0".to_string(),
        size_bytes: 1_790_000_000,
        size_display: "1.8 GB".to_string(),
        filename: "phi-2.q4_k_m.gguf".to_string(),
        parameters: "2.7B".to_string(),
        quantization: "Q4_K_M".to_string(),
        context_length: 2048,
        use_case: "General conversation, coding".to_string(),
        tags: ["mobile", "coding", "conversation"].iter().map(|t| t.to_string()).collect(),
        license: "MIT".to_string(),
        author: "Microsoft".to_string(),
        sha256: None,
        mirrors: vec![DownloadMirror {
            name: "Hugging Face".to_string(),
            url: "https://huggingface.co/TheBloke/phi-2-GGUF/resolve/main/phi-2.Q4_K_M.gguf".to_string(),
            priority: 1,
            location: MirrorLocation::Global,
            kind: MirrorKind::Direct,
        }],
        recommended_ram_gb: 3,
        performance_score: 8.5,
        quality_score: 8.0,
    }
}

fn tinyllama_chat() -> CatalogEntry {
    CatalogEntry {
        id: "tinyllama-1.1b-chat".to_string(),
        name: "TinyLlama 1.1B Chat".to_string(),
        description: "Small chat model that runs on almost any device".to_string(),
        version: "1.0.0".to_string(),
        size_bytes: 669_000_000,
        size_display: "669 MB".to_string(),
        filename: "tinyllama-1.1b-chat-v1.0.q4_k_m.gguf".to_string(),
        parameters: "1.1B".to_string(),
        quantization: "Q4_K_M".to_string(),
        context_length: 2048,
        use_case: "Lightweight chat".to_string(),
        tags: ["mobile", "chat", "small"].iter().map(|t| t.to_string()).collect(),
        license: "Apache 2.0".to_string(),
        author: "TinyLlama".to_string(),
        sha256: None,
        mirrors: vec![DownloadMirror {
            name: "Hugging Face".to_string(),
            url: "https://huggingface.co/TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF/resolve/main/tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf".to_string(),
            priority: 1,
            location: MirrorLocation::Global,
            kind: MirrorKind::Direct,
        }],
        recommended_ram_gb: 2,
        performance_score: 9.0,
        quality_score: 6.0,
    }
}
