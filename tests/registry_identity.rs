//! Integration tests for dynamic type identity
//!
//! One type object per signature, created exactly once even under
//! concurrent first requests, with placeholders for unknown signatures.

use dynschema::catalog::registry::{DynamicType, DynamicTypeRegistry, TypeFactory};
use dynschema::catalog::store::SchemaStore;
use dynschema::catalog::{DEFAULT_SIGNATURE, Signature};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;

fn counting_factory(calls: Arc<AtomicUsize>) -> TypeFactory {
    Arc::new(move |signature: &Signature| {
        calls.fetch_add(1, Ordering::SeqCst);
        // Widen the window for racing creators.
        thread::sleep(Duration::from_millis(20));
        DynamicType::placeholder(*signature)
    })
}

#[test]
fn test_concurrent_first_requests_share_one_type() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(DynamicTypeRegistry::with_factory(counting_factory(
        calls.clone(),
    )));
    let signature = Signature::of_text("<schema><field name='race'/></schema>");
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                registry.resolve(&signature)
            })
        })
        .collect();

    let types: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for ty in &types[1..] {
        assert!(Arc::ptr_eq(&types[0], ty));
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_distinct_signatures_get_distinct_types() {
    let store = Arc::new(SchemaStore::in_memory().unwrap());
    let a = store.add("<schema><field name='a'/></schema>").unwrap();
    let b = store.add("<schema><field name='b'/></schema>").unwrap();
    let registry = DynamicTypeRegistry::new(store);

    let ta = registry.resolve(&a);
    let tb = registry.resolve(&b);
    assert_ne!(*ta, *tb);
    assert_eq!(ta.name(), a.type_name());
    assert_eq!(tb.field_names(), vec!["b"]);
    assert!(Arc::ptr_eq(&ta, &registry.resolve(&a)));
}

#[test]
fn test_default_signature_resolves_to_empty_type() {
    let store = Arc::new(SchemaStore::in_memory().unwrap());
    let registry = DynamicTypeRegistry::new(store);

    let ty = registry.resolve(&DEFAULT_SIGNATURE);
    assert!(!ty.is_placeholder());
    assert!(ty.field_names().is_empty());
}

#[test]
fn test_type_reflects_schema_cached_at_creation() {
    let store = Arc::new(SchemaStore::in_memory().unwrap());
    let text = "<schema><field name='count' type='int' default='7'/></schema>";
    let signature = store.add(text).unwrap();
    let cached = store.load(text).unwrap();

    let registry = DynamicTypeRegistry::new(store);
    let ty = registry.resolve(&signature);
    assert!(Arc::ptr_eq(ty.schema().unwrap(), &cached));
    assert_eq!(ty.field_default("count").and_then(|v| v.as_int()), Some(7));
}

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_unknown_signature_gets_placeholder_with_warning() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    let store = Arc::new(SchemaStore::in_memory().unwrap());
    let registry = DynamicTypeRegistry::new(store);
    let missing = Signature::of_text("<schema><field name='nowhere'/></schema>");

    let (first, second) = tracing::subscriber::with_default(subscriber, || {
        (registry.resolve(&missing), registry.resolve(&missing))
    });

    assert!(first.is_placeholder());
    assert!(first.field_names().is_empty());
    assert_eq!(first.name(), missing.type_name());
    assert!(Arc::ptr_eq(&first, &second));

    let output = log.contents();
    assert!(output.contains("WARN"));
    assert!(output.contains("placeholder"));
    assert!(output.contains(&missing.to_hex()));
    // Memoized: the warning fires once.
    assert_eq!(output.matches("placeholder").count(), 1);
}

#[test]
fn test_clear_forgets_types() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = DynamicTypeRegistry::with_factory(counting_factory(calls.clone()));
    let signature = Signature::of_text("x");

    let before = registry.resolve(&signature);
    registry.clear();
    assert!(registry.is_empty());

    let after = registry.resolve(&signature);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
