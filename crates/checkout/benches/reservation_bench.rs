use checkout::{
    CartService, CatalogReadModel, CheckoutConfig, CheckoutDetails, CheckoutOrchestrator,
    StockReservationManager,
};
use common::{Money, Owner, ProductId, UserId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{ItemOptions, Product};
use futures_util::future::join_all;
use store::InMemoryRecordStore;

async fn seeded_store(stock: u32) -> InMemoryRecordStore {
    let store = InMemoryRecordStore::new();
    CatalogReadModel::new(store.clone())
        .upsert_product(&Product::new("ESP", "Espresso", Money::from_cents(300), stock).unwrap())
        .await
        .unwrap();
    store
}

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(seeded_store(1_000_000));
    let manager = StockReservationManager::new(store, 16);
    let esp = ProductId::new("ESP");

    c.bench_function("reservation/reserve_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let reservation = manager.reserve(&esp, 1).await.unwrap();
                manager.release(&reservation).await.unwrap();
            });
        });
    });
}

fn bench_contended_reserves(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("reservation/contended");

    for contenders in [4usize, 16, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(contenders),
            &contenders,
            |b, &contenders| {
                b.iter(|| {
                    rt.block_on(async {
                        let store = seeded_store(contenders as u32).await;
                        let manager = StockReservationManager::new(store, 256);
                        let tasks = (0..contenders).map(|_| {
                            let manager = manager.clone();
                            tokio::spawn(async move {
                                manager.reserve(&ProductId::new("ESP"), 1).await
                            })
                        });
                        join_all(tasks).await;
                    });
                });
            },
        );
    }
    group.finish();
}

fn bench_checkout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(seeded_store(10_000_000));
    let config = CheckoutConfig::default();
    let carts = CartService::new(store.clone(), config.clone());
    let orchestrator = CheckoutOrchestrator::new(store, config);

    c.bench_function("checkout/single_line", |b| {
        b.iter(|| {
            rt.block_on(async {
                let owner = Owner::User(UserId::new());
                carts
                    .add_item(&owner, &ProductId::new("ESP"), 2, ItemOptions::new())
                    .await
                    .unwrap();
                orchestrator
                    .checkout(&owner, CheckoutDetails::default())
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_release,
    bench_contended_reserves,
    bench_checkout
);
criterion_main!(benches);
