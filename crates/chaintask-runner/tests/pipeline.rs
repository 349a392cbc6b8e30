//! Crosscheck → signal → task runner, end to end over one shared store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::Store;
use chaintask_core::types::{LogFilter, LogIdentity, RawLog};
use chaintask_crosscheck::{ChainProvider, CrosscheckConfig, LogQuery, TickOutcome};
use chaintask_runner::{PlanBuilder, TaskFlow};
use chaintask_storage::MemoryStore;

struct FixedChain {
    head: u64,
    logs: Vec<RawLog>,
}

#[async_trait]
impl ChainProvider for FixedChain {
    async fn block_number(&self) -> Result<u64, ChainTaskError> {
        Ok(self.head)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, ChainTaskError> {
        Ok(self
            .logs
            .iter()
            .filter(|l| {
                let n = l.block_number_u64();
                n >= query.from_block && n <= query.to_block
            })
            .cloned()
            .collect())
    }
}

fn transfer(block: u64, tx: &str, index: u32) -> RawLog {
    RawLog {
        address: "0xtoken".into(),
        topics: vec!["0xddf252ad".into()],
        data: format!("0x{index:064x}"),
        block_number: format!("0x{block:x}"),
        block_hash: String::new(),
        tx_hash: tx.into(),
        log_index: format!("0x{index:x}"),
        removed: None,
    }
}

fn tx_of(args: &[Value]) -> String {
    args.last()
        .and_then(|log| log["transactionHash"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn settle_flow(handled: &Arc<Mutex<Vec<String>>>) -> TaskFlow {
    let sink = handled.clone();
    TaskFlow::new("settle")
        .prefix("Settle:", "Done-Settle:")
        .ttl(None, None)
        .key(tx_of)
        .handle(move |args, _task| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(tx_of(&args));
                Ok(())
            }
        })
}

fn crosscheck(from: u64, to: u64) -> CrosscheckConfig {
    CrosscheckConfig {
        filter: LogFilter::address("0xtoken").topic("0xddf252ad"),
        from_block: Some(from),
        to_block: Some(to),
        batch_blocks_count: Some(10),
        store_key_prefix: "cc:".into(),
        ..Default::default()
    }
}

async fn wait_for(store: &Arc<dyn Store>, key: &str) {
    for _ in 0..100 {
        if store.has(key).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{key} never appeared");
}

#[tokio::test]
async fn missed_log_is_replayed_through_the_live_path() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let delivered = transfer(101, "0xa", 0);
    let missed = transfer(105, "0xb", 1);
    let provider = Arc::new(FixedChain {
        head: 500,
        logs: vec![delivered.clone(), missed.clone()],
    });

    let handled = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PlanBuilder::new();
    let event = builder.event("Transfer");
    builder.crosscheck(event, crosscheck(100, 109));
    builder.task(event, settle_flow(&handled));
    let plan = builder.assemble(store.clone(), Some(provider)).unwrap();

    // the subscription delivers only the first log
    plan.event(event).on_live_log(&delivered).await.unwrap();
    wait_for(&store, "Done-Settle:0xa").await;

    let engine = plan.engine(event).unwrap();
    let outcome = engine.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Scanned { recovered: 1, .. }));
    wait_for(&store, "Done-Settle:0xb").await;

    let mut seen = handled.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["0xa", "0xb"]);

    let mut cached = engine.cache().get_logs().await.unwrap();
    cached.sort_by(|x, y| x.tx_hash.cmp(&y.tx_hash));
    assert_eq!(
        cached,
        vec![LogIdentity::new("0xa", 0), LogIdentity::new("0xb", 1)]
    );
    assert_eq!(engine.cache().get_checkpoint().await.unwrap(), Some(110));
    assert!(store.keys(Some("Settle:*")).await.unwrap().is_empty());
}

#[tokio::test]
async fn restart_resumes_pending_tasks_and_checkpoint() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    // left behind by a previous process
    store
        .set("Settle:0xold", json!([{ "transactionHash": "0xold" }]), None)
        .await
        .unwrap();
    store.set("cc:#checkpoint", json!(110), None).await.unwrap();

    let provider = Arc::new(FixedChain {
        head: 500,
        logs: vec![transfer(104, "0xa", 0), transfer(112, "0xc", 0)],
    });
    let handled = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PlanBuilder::new();
    let event = builder.event("Transfer");
    let mut config = crosscheck(0, 119);
    config.from_block = None;
    config.to_block = None;
    builder.crosscheck(event, config);
    let task = builder.task(event, settle_flow(&handled));
    let plan = builder.assemble(store.clone(), Some(provider)).unwrap();

    assert_eq!(plan.runner(task).start().await.unwrap(), 1);

    let engine = plan.engine(event).unwrap();
    assert_eq!(engine.init().await.unwrap(), 110);
    engine.tick().await.unwrap();
    wait_for(&store, "Done-Settle:0xc").await;

    // block 104 is behind the checkpoint and is not rescanned
    assert_eq!(*handled.lock().unwrap(), vec!["0xold", "0xc"]);
}

#[tokio::test]
async fn play_runs_bounded_crosscheck_to_completion() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let provider = Arc::new(FixedChain {
        head: 500,
        logs: vec![transfer(100, "0xa", 0), transfer(119, "0xb", 0)],
    });
    let handled = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PlanBuilder::new();
    let event = builder.event("Transfer");
    let mut config = crosscheck(100, 119);
    config.polling_interval_ms = Some(10);
    builder.crosscheck(event, config);
    builder.task(event, settle_flow(&handled));
    let plan = builder.assemble(store.clone(), Some(provider)).unwrap();

    plan.play();
    wait_for(&store, "Done-Settle:0xa").await;
    wait_for(&store, "Done-Settle:0xb").await;
    plan.stop().await;

    let engine = plan.engine(event).unwrap();
    assert_eq!(engine.checkpoint(), Some(120));
}

#[tokio::test]
async fn default_cache_prefix_stays_clear_of_task_records() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let provider = Arc::new(FixedChain {
        head: 500,
        logs: Vec::new(),
    });
    let handled = Arc::new(Mutex::new(Vec::new()));
    let sink = handled.clone();

    let mut builder = PlanBuilder::new();
    let event = builder.event("Transfer");
    builder.crosscheck(event, CrosscheckConfig::default());
    builder.task(
        event,
        TaskFlow::new("generic").handle(move |args, _task| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(tx_of(&args));
                Ok(())
            }
        }),
    );
    let plan = builder.assemble(store.clone(), Some(provider)).unwrap();

    let engine = plan.engine(event).unwrap();
    assert_eq!(engine.cache().prefix(), "CrossCheck:Transfer:");

    plan.event(event)
        .on_live_log(&transfer(101, "0xa", 1))
        .await
        .unwrap();
    for _ in 0..100 {
        if !store.keys(Some("Done-Task:*")).await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*handled.lock().unwrap(), vec!["0xa"]);

    // the ignore list rebuilds even with task records in the same store
    assert_eq!(
        engine.cache().get_logs().await.unwrap(),
        vec![LogIdentity::new("0xa", 1)]
    );
}
