use opaldb::core::tasks::TimeWheel;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn counting_job(counter: &Arc<AtomicUsize>) -> futures::future::BoxFuture<'static, ()> {
    let counter = Arc::clone(counter);
    Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_job_fires_after_delay() {
    let wheel = TimeWheel::start(Duration::from_millis(20), 16);
    let fired = Arc::new(AtomicUsize::new(0));
    wheel.add_job("job".into(), Duration::from_millis(0), counting_job(&fired));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    wheel.abort();
}

#[tokio::test]
async fn test_removed_job_does_not_fire() {
    let wheel = TimeWheel::start(Duration::from_millis(20), 16);
    let fired = Arc::new(AtomicUsize::new(0));
    wheel.add_job("job".into(), Duration::from_millis(100), counting_job(&fired));
    wheel.remove_job("job");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    wheel.abort();
}

#[tokio::test]
async fn test_re_adding_a_key_replaces_the_job() {
    let wheel = TimeWheel::start(Duration::from_millis(20), 16);
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    wheel.add_job("job".into(), Duration::from_millis(60), counting_job(&first));
    wheel.add_job("job".into(), Duration::from_millis(60), counting_job(&second));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0, "replaced job must not fire");
    assert_eq!(second.load(Ordering::SeqCst), 1);
    wheel.abort();
}

#[tokio::test]
async fn test_panicking_job_does_not_kill_the_wheel() {
    let wheel = TimeWheel::start(Duration::from_millis(20), 16);
    wheel.add_job(
        "bad".into(),
        Duration::from_millis(0),
        Box::pin(async { panic!("callback exploded") }),
    );
    let fired = Arc::new(AtomicUsize::new(0));
    wheel.add_job("good".into(), Duration::from_millis(60), counting_job(&fired));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    wheel.abort();
}

#[tokio::test]
async fn test_long_delay_waits_for_full_circles() {
    // 4 slots * 20ms per tick: a 160ms delay needs two trips around.
    let wheel = TimeWheel::start(Duration::from_millis(20), 4);
    let fired = Arc::new(AtomicUsize::new(0));
    wheel.add_job("far".into(), Duration::from_millis(160), counting_job(&fired));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    wheel.abort();
}
