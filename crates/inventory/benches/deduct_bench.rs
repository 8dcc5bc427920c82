use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{InMemoryStockRepository, InventoryService, StockItem};

fn bench_single_deduct(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("inventory/deduct_single", |b| {
        b.iter(|| {
            rt.block_on(async {
                let repo = InMemoryStockRepository::new();
                repo.set_stock("A", 10).await.unwrap();
                let service = InventoryService::new(Arc::new(repo));
                service
                    .deduct("o1", &[StockItem::new("A", 1)])
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_concurrent_deduct(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("inventory/deduct_concurrent_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let repo = InMemoryStockRepository::new();
                repo.set_stock("A", 50).await.unwrap();
                repo.set_stock("B", 50).await.unwrap();
                let service = InventoryService::new(Arc::new(repo));

                let handles: Vec<_> = (0..100)
                    .map(|i| {
                        let service = service.clone();
                        tokio::spawn(async move {
                            let _ = service
                                .deduct(
                                    &format!("o{i}"),
                                    &[StockItem::new("A", 1), StockItem::new("B", 1)],
                                )
                                .await;
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_single_deduct, bench_concurrent_deduct);
criterion_main!(benches);
