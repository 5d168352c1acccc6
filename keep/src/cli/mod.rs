use std::collections::HashMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{KeepError, Result};
use crate::keeper::{AnalyzeOptions, GetContextOptions, GetOptions, Keeper, MoveOptions, PutOptions};
use crate::models::FindRequest;

/// Top-level CLI, one subcommand per operator verb.
#[derive(Parser, Debug)]
#[command(name = "keep")]
#[command(author, version, about = "Local-first reflective memory store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Collection to operate on.
    #[arg(long, global = true, default_value = "default")]
    pub collection: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or update a document.
    Put {
        /// Raw content, or a `file://` URI to read from.
        content: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Render an item or a `@v{N}`/`@p{N}` sub-entry.
    Get {
        id: String,
        #[arg(long)]
        version: Option<u64>,
        /// Print the full assembled context instead of just the item.
        #[arg(long)]
        context: bool,
    },
    /// Hybrid search.
    Find {
        /// Free-text query. Omit and use `--similar-to` for a pure
        /// similarity lookup.
        query: Option<String>,
        #[arg(long)]
        similar_to: Option<String>,
        #[arg(long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,
        #[arg(long)]
        fulltext: bool,
        #[arg(long)]
        deep: bool,
        #[arg(long)]
        include_self: bool,
        #[arg(long)]
        include_hidden: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
    },
    /// List recent items, optionally filtered by tags.
    List {
        #[arg(long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Read or set `.now`, the working-context document.
    Now {
        content: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Extract matching version history into a named document.
    Move {
        target: String,
        #[arg(long)]
        source: Option<String>,
        #[arg(long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,
        #[arg(long)]
        only_current: bool,
    },
    /// Add or remove user tags without touching content or embeddings.
    TagUpdate {
        id: String,
        #[arg(long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
        #[arg(long = "unset")]
        unset: Vec<String>,
    },
    /// Decompose a document into analyzer parts.
    Analyze {
        id: String,
        #[arg(long = "tag", value_parser = parse_key_val)]
        tags: Vec<(String, String)>,
        #[arg(long)]
        force: bool,
    },
    /// Revert a version, or delete a document outright.
    Del {
        id: String,
        #[arg(long)]
        delete_versions: bool,
    },
    /// Drain or inspect the background pending queue.
    Pending {
        /// Reset every dead-lettered task back to pending.
        #[arg(long)]
        retry: bool,
        /// Enqueue a reindex task for every document in the collection.
        #[arg(long)]
        reindex: bool,
        /// Signal a running `--daemon` to stop (best-effort; this CLI has
        /// no standing process to signal outside of one it itself started).
        #[arg(long)]
        stop: bool,
        /// Keep draining the queue on an interval instead of a single pass.
        #[arg(long)]
        daemon: bool,
    },
    /// Streaming JSON export/import.
    Data {
        #[command(subcommand)]
        action: DataAction,
    },
    /// Render a `.prompt/*` template with `key=value` substitutions.
    Prompt {
        name: String,
        #[arg(value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },
    /// Detect (and optionally repair) store/embedding drift.
    Reconcile {
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DataAction {
    Export {
        file: String,
    },
    Import {
        file: String,
        #[arg(long, default_value = "merge")]
        mode: String,
    },
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    Ok((k.to_string(), v.to_string()))
}

fn tag_map(pairs: &[(String, String)]) -> HashMap<String, String> {
    pairs.iter().cloned().collect()
}

/// Dispatches one parsed command against `keeper`, printing its result as
/// pretty JSON to stdout so the CLI stays scriptable rather than tied to a
/// particular terminal layout.
pub async fn run(keeper: &Arc<Keeper>, command: Command) -> Result<()> {
    match command {
        Command::Put { content, id, tags, summary, force } => {
            let (item, created) = keeper
                .put(
                    &content,
                    PutOptions { id, tags: tag_map(&tags), summary, created_at: None, force },
                )
                .await?;
            print_json(&serde_json::json!({ "item": item, "created": created }))
        }
        Command::Get { id, version, context } => {
            if context {
                let ctx = keeper.get_context(&id, GetContextOptions { version, ..Default::default() }).await?;
                print_json(&ctx)
            } else {
                let item = keeper.get(&id, GetOptions { version }).await?;
                print_json(&item)
            }
        }
        Command::Find {
            query,
            similar_to,
            tags,
            fulltext,
            deep,
            include_self,
            include_hidden,
            limit,
            since,
            until,
        } => {
            let req = FindRequest {
                query,
                similar_to,
                tags: tag_map(&tags),
                fulltext,
                deep,
                include_self,
                include_hidden,
                limit,
                since,
                until,
            };
            let items = keeper.find(req).await?;
            print_json(&items)
        }
        Command::List { tags, limit } => {
            let items = keeper.list(tag_map(&tags), limit).await?;
            print_json(&items)
        }
        Command::Now { content, force } => match content {
            Some(content) => {
                let (item, _) = keeper
                    .put(&content, PutOptions { id: Some(".now".to_string()), force, ..Default::default() })
                    .await?;
                print_json(&item)
            }
            None => {
                let item = keeper.get(".now", GetOptions::default()).await?;
                print_json(&item)
            }
        },
        Command::Move { target, source, tags, only_current } => {
            let item = keeper
                .move_doc(
                    &target,
                    MoveOptions {
                        source_id: source,
                        tags: if tags.is_empty() { None } else { Some(tag_map(&tags)) },
                        only_current,
                    },
                )
                .await?;
            print_json(&item)
        }
        Command::TagUpdate { id, set, unset } => {
            let mut tags = tag_map(&set);
            for key in unset {
                tags.insert(key, String::new());
            }
            let item = keeper.tag(&id, tags).await?;
            print_json(&item)
        }
        Command::Analyze { id, tags, force } => {
            let parts = keeper.analyze(&id, AnalyzeOptions { tags: tag_map(&tags), force }).await?;
            print_json(&parts)
        }
        Command::Del { id, delete_versions } => {
            if crate::models::is_version_id(&id) {
                let base = crate::models::base_id(&id);
                let item = keeper.revert(base).await?;
                print_json(&item)
            } else {
                let deleted = keeper.delete(&id, delete_versions).await?;
                print_json(&serde_json::json!({ "deleted": deleted }))
            }
        }
        Command::Pending { retry, reindex, stop, daemon } => {
            run_pending(keeper, retry, reindex, stop, daemon).await
        }
        Command::Data { action } => match action {
            DataAction::Export { file } => export_data(keeper, &file).await,
            DataAction::Import { file, mode } => import_data(keeper, &file, &mode).await,
        },
        Command::Prompt { name, args } => {
            let rendered = render_prompt(keeper, &name, &tag_map(&args)).await?;
            print_json(&serde_json::json!({ "prompt": rendered }))
        }
        Command::Reconcile { fix } => {
            let report = keeper.reconcile_now(fix).await?;
            print_json(&serde_json::json!({
                "missing": report.missing,
                "reconciled": report.reconciled,
                "failed": report.failed,
            }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_pending(keeper: &Arc<Keeper>, retry: bool, reindex: bool, stop: bool, daemon: bool) -> Result<()> {
    if stop {
        return print_json(&serde_json::json!({
            "stopped": false,
            "note": "no running --daemon process found in this invocation",
        }));
    }

    if retry {
        let reset = keeper.queue.retry_failed(Some(keeper.collection())).await?;
        print_json(&serde_json::json!({ "retried": reset }))?;
    }

    if reindex {
        let ids = keeper.documents.list_ids(keeper.collection()).await?;
        let mut enqueued = 0u64;
        for id in &ids {
            if let Some(doc) = keeper.documents.get(keeper.collection(), id).await? {
                keeper
                    .queue
                    .enqueue(id, keeper.collection(), "reindex", &doc.summary, HashMap::new())
                    .await?;
                enqueued += 1;
            }
        }
        print_json(&serde_json::json!({ "reindex_enqueued": enqueued }))?;
    }

    if daemon {
        loop {
            drain_once(keeper).await;
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    }

    drain_once(keeper).await;
    print_json(&serde_json::json!({ "drained": true }))
}

async fn drain_once(keeper: &Arc<Keeper>) {
    crate::processors::run_pending_tasks(
        &*keeper.queue,
        &*keeper.documents,
        &*keeper.vectors,
        keeper.embeddings.as_deref(),
        &keeper.llm,
        keeper.collection(),
    )
    .await;
}

/// Export envelope: `format = "keep-export"`, `version = 1`, plus the
/// document list. Reuses `ImportDocument` as the
/// wire shape for both directions rather than a parallel struct, since
/// `import_batch` already takes exactly this.
#[derive(Debug, Serialize)]
struct ExportEnvelope<'a> {
    format: &'static str,
    version: u32,
    exported_at: String,
    store_info: serde_json::Value,
    documents: &'a [crate::store::ImportDocument],
}

#[derive(Debug, Deserialize)]
struct ImportEnvelope {
    documents: Vec<crate::store::ImportDocument>,
}

async fn export_data(keeper: &Arc<Keeper>, file: &str) -> Result<()> {
    let collection = keeper.collection();
    let ids = keeper.documents.list_ids(collection).await?;
    let mut documents = Vec::with_capacity(ids.len());

    for id in ids {
        let Some(doc) = keeper.documents.get(collection, &id).await? else {
            continue;
        };
        let versions = keeper
            .documents
            .list_versions(collection, &id)
            .await?
            .into_iter()
            .map(|v| crate::store::VersionInfo {
                version: v.version,
                summary: v.summary,
                tags: v.tags,
                content_hash: v.content_hash,
                created_at: v.created_at,
            })
            .collect();
        let parts = keeper
            .documents
            .list_parts(collection, &id)
            .await?
            .into_iter()
            .map(|p| crate::store::PartInput {
                part_num: p.part_num,
                summary: p.summary,
                tags: p.tags,
                content: p.content,
            })
            .collect();

        documents.push(crate::store::ImportDocument {
            id: doc.id,
            summary: doc.summary,
            tags: doc.tags,
            content_hash: doc.content_hash,
            content_hash_full: doc.content_hash_full,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            accessed_at: doc.accessed_at,
            versions,
            parts,
        });
    }

    let envelope = ExportEnvelope {
        format: "keep-export",
        version: 1,
        exported_at: chrono::Utc::now().to_rfc3339(),
        store_info: serde_json::json!({ "collection": collection }),
        documents: &documents,
    };

    let json = serde_json::to_string_pretty(&envelope)?;
    tokio::fs::write(file, json).await?;
    print_json(&serde_json::json!({ "exported": documents.len(), "file": file }))
}

async fn import_data(keeper: &Arc<Keeper>, file: &str, mode: &str) -> Result<()> {
    let collection = keeper.collection();
    let raw = tokio::fs::read_to_string(file).await?;
    let envelope: ImportEnvelope = serde_json::from_str(&raw)?;

    if mode == "replace" {
        keeper.documents.delete_collection_all(collection).await?;
    } else if mode != "merge" {
        return Err(KeepError::invalid(format!("unknown import mode `{mode}`")));
    }

    let count = envelope.documents.len();
    keeper.documents.import_batch(collection, envelope.documents).await?;

    for id in keeper.documents.list_ids(collection).await? {
        if let Some(doc) = keeper.documents.get(collection, &id).await? {
            let _ = keeper
                .queue
                .enqueue(&id, collection, "reindex", &doc.summary, HashMap::new())
                .await;
        }
    }

    print_json(&serde_json::json!({ "imported": count, "mode": mode }))
}

/// Renders a `.prompt/{name}` document, substituting `{key}` placeholders
/// from `args`.
async fn render_prompt(keeper: &Arc<Keeper>, name: &str, args: &HashMap<String, String>) -> Result<String> {
    let id = format!(".prompt/{name}");
    let item = keeper
        .get(&id, GetOptions::default())
        .await?
        .ok_or_else(|| KeepError::not_found(id))?;
    Ok(substitute_placeholders(&item.summary, args))
}

fn substitute_placeholders(template: &str, args: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in args {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_val_pairs() {
        assert_eq!(parse_key_val("project=keep").unwrap(), ("project".to_string(), "keep".to_string()));
        assert!(parse_key_val("no-equals-sign").is_err());
    }

    #[test]
    fn substitutes_known_placeholders_and_leaves_unknown() {
        let mut args = HashMap::new();
        args.insert("name".to_string(), "Ferris".to_string());
        let rendered = substitute_placeholders("Hello {name}, see {other}", &args);
        assert_eq!(rendered, "Hello Ferris, see {other}");
    }
}
