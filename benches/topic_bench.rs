use criterion::{black_box, criterion_group, criterion_main, Criterion};
use recon_worker::job::Task;
use recon_worker::queue::TopicQueue;
use recon_worker::topic::TopicSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn workspace_list(size: usize) -> String {
    (0..size)
        .map(|i| format!("{:08x}-9d4a-4e7b-8c2f-1a2b3c4d5e6f", i))
        .collect::<Vec<_>>()
        .join(",")
}

fn bench_resolve_modes(c: &mut Criterion) {
    c.bench_function("resolve_mode_list", |b| {
        b.iter(|| black_box(TopicSet::resolve(black_box("1,2,3,4,1,2,3,4"), "").unwrap()));
    });
}

fn bench_resolve_workspaces(c: &mut Criterion) {
    let workspaces = workspace_list(100);

    c.bench_function("resolve_100_workspaces", |b| {
        b.iter(|| black_box(TopicSet::resolve("5", black_box(&workspaces)).unwrap()));
    });
}

fn bench_claim_tasks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("enqueue_and_claim_50_tasks", |b| {
        b.iter(|| {
            let temp_dir = TempDir::new().unwrap();
            let queue = Arc::new(TopicQueue::new(temp_dir.path().to_path_buf(), "active"));
            rt.block_on(async {
                queue.init().await.unwrap();
                for i in 0..50 {
                    let task = Task::new("active", "portscan", serde_json::json!({ "n": i }));
                    queue.enqueue(&task).await.unwrap();
                }
                while let Some(claimed) = queue.claim().await.unwrap() {
                    claimed.complete().await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_resolve_modes,
    bench_resolve_workspaces,
    bench_claim_tasks
);
criterion_main!(benches);
