//! Integration Tests for the Binding Engine
//!
//! These tests drive full binders against a change-notifying stub graph
//! and verify scheduling, re-attachment, overriding, and fault handling
//! end to end.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use tether_core::{
    Bindable, Binder, BindingError, ChangeNotifier, EvalError, Expr, ListChange, Member, Obj,
    ObservableList, TypeDescriptor, Value, ValueKind,
};

/// Mutable, change-notifying test object. Setters skip notification
/// when the value is unchanged.
#[derive(Default)]
struct Stub {
    int: RwLock<i64>,
    flag: RwLock<bool>,
    label: RwLock<Option<Arc<str>>>,
    nested: RwLock<Option<Arc<Stub>>>,
    quiet: RwLock<Option<Arc<Silent>>>,
    items: Arc<ObservableList>,
    notifier: ChangeNotifier,
}

impl Stub {
    fn new() -> Arc<Stub> {
        Arc::default()
    }

    fn int(&self) -> i64 {
        *self.int.read()
    }

    fn set_int(&self, value: i64) -> Result<(), BindingError> {
        if std::mem::replace(&mut *self.int.write(), value) == value {
            return Ok(());
        }
        self.notifier.raise("int")
    }

    fn flag(&self) -> bool {
        *self.flag.read()
    }

    fn set_flag(&self, value: bool) -> Result<(), BindingError> {
        if std::mem::replace(&mut *self.flag.write(), value) == value {
            return Ok(());
        }
        self.notifier.raise("flag")
    }

    fn label(&self) -> Option<Arc<str>> {
        self.label.read().clone()
    }

    fn set_label(&self, value: Option<Arc<str>>) -> Result<(), BindingError> {
        if std::mem::replace(&mut *self.label.write(), value.clone()) == value {
            return Ok(());
        }
        self.notifier.raise("label")
    }

    fn nested(&self) -> Option<Arc<Stub>> {
        self.nested.read().clone()
    }

    fn set_nested(&self, value: Option<Arc<Stub>>) -> Result<(), BindingError> {
        let old = std::mem::replace(&mut *self.nested.write(), value.clone());
        let same = match (&old, &value) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        self.notifier.raise("nested")
    }
}

fn as_stub(b: &dyn Bindable) -> &Stub {
    b.as_any().downcast_ref::<Stub>().expect("Stub instance")
}

fn get_int(b: &dyn Bindable) -> Value {
    Value::Int(as_stub(b).int())
}

fn set_int_member(b: &dyn Bindable, v: Value) -> Result<(), BindingError> {
    match v {
        Value::Int(i) => as_stub(b).set_int(i),
        other => Err(EvalError::Invalid(format!("int member given {other}")).into()),
    }
}

fn get_flag(b: &dyn Bindable) -> Value {
    Value::Bool(as_stub(b).flag())
}

fn set_flag_member(b: &dyn Bindable, v: Value) -> Result<(), BindingError> {
    match v {
        Value::Bool(flag) => as_stub(b).set_flag(flag),
        other => Err(EvalError::Invalid(format!("flag member given {other}")).into()),
    }
}

fn get_label(b: &dyn Bindable) -> Value {
    match as_stub(b).label() {
        Some(s) => Value::Str(s),
        None => Value::Null,
    }
}

fn set_label_member(b: &dyn Bindable, v: Value) -> Result<(), BindingError> {
    match v {
        Value::Str(s) => as_stub(b).set_label(Some(s)),
        Value::Null => as_stub(b).set_label(None),
        other => Err(EvalError::Invalid(format!("label member given {other}")).into()),
    }
}

fn get_nested(b: &dyn Bindable) -> Value {
    match as_stub(b).nested() {
        Some(nested) => Value::Object(nested),
        None => Value::Null,
    }
}

fn get_quiet(b: &dyn Bindable) -> Value {
    match as_stub(b).quiet.read().clone() {
        Some(quiet) => Value::Object(quiet as Obj),
        None => Value::Null,
    }
}

fn get_items(b: &dyn Bindable) -> Value {
    Value::List(Arc::clone(&as_stub(b).items))
}

/// Object without a change notifier. Bindings through it see a snapshot
/// until an ancestor member raises again.
#[derive(Default)]
struct Silent {
    value: RwLock<i64>,
}

fn as_silent(b: &dyn Bindable) -> &Silent {
    b.as_any().downcast_ref::<Silent>().expect("Silent instance")
}

fn get_value(b: &dyn Bindable) -> Value {
    Value::Int(*as_silent(b).value.read())
}

fn silent_descriptor() -> &'static TypeDescriptor {
    static DESC: OnceLock<TypeDescriptor> = OnceLock::new();
    DESC.get_or_init(|| {
        TypeDescriptor::builder("Silent")
            .with(Member::readable("value", ValueKind::Int, get_value))
            .build()
    })
}

impl Bindable for Silent {
    fn descriptor(&self) -> &'static TypeDescriptor {
        silent_descriptor()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn stub_descriptor() -> &'static TypeDescriptor {
    static DESC: OnceLock<TypeDescriptor> = OnceLock::new();
    DESC.get_or_init(|| {
        TypeDescriptor::builder("Stub")
            .with(Member::writable("int", ValueKind::Int, get_int, set_int_member))
            .with(Member::writable("flag", ValueKind::Bool, get_flag, set_flag_member))
            .with(Member::writable(
                "label",
                ValueKind::Str,
                get_label,
                set_label_member,
            ))
            .with(Member::readable("nested", ValueKind::Object, get_nested).of_type(stub_descriptor))
            .with(Member::readable("quiet", ValueKind::Object, get_quiet).of_type(silent_descriptor))
            .with(Member::readable("items", ValueKind::List, get_items).of_items(stub_descriptor))
            .build()
    })
}

impl Bindable for Stub {
    fn descriptor(&self) -> &'static TypeDescriptor {
        stub_descriptor()
    }

    fn notifier(&self) -> Option<&ChangeNotifier> {
        Some(&self.notifier)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn obj(stub: &Arc<Stub>) -> Obj {
    Arc::clone(stub) as Obj
}

fn count_executions(binder: &mut Binder, source: Expr) -> Arc<AtomicI32> {
    let counter = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&counter);
    binder
        .bind(source)
        .to_action(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    counter
}

/// Test that the canonical label-tracks-int rule assigns on attach and
/// on every change.
#[test]
fn assignment_tracks_source_member() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("label"))
        .unwrap();

    let stub = Stub::new();
    let handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.label().as_deref(), Some("0"));

    stub.set_int(5).unwrap();
    assert_eq!(stub.label().as_deref(), Some("5"));

    drop(handle);
    stub.set_int(7).unwrap();
    assert_eq!(stub.label().as_deref(), Some("5"));
}

/// Test that a rule reading one member through two chains runs once per
/// change.
#[test]
fn shared_dependency_runs_once() {
    let mut binder = Binder::new(stub_descriptor());
    let source = Expr::context()
        .member("int")
        .add(Expr::context().member("int"));
    let counter = count_executions(&mut binder, source);

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    stub.set_int(3).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

/// Test that run-on-attach executions follow declaration order.
#[test]
fn attach_runs_rules_in_declaration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut binder = Binder::new(stub_descriptor());
    for tag in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        binder
            .bind(Expr::context().member("int"))
            .override_key(tag)
            .to_action(move |_, _| {
                order.lock().push(tag);
                Ok(())
            })
            .unwrap();
    }

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(&*order.lock(), &["first", "second", "third"]);
}

#[test]
fn do_not_run_on_attach_waits_for_a_change() {
    let counter = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&counter);
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int"))
        .do_not_run_on_attach()
        .to_action(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    stub.set_int(1).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

/// Test that a later rule with the same target replaces the earlier one.
#[test]
fn later_rule_overrides_same_target() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("label"))
        .unwrap();
    binder
        .bind(Expr::constant("fixed"))
        .to(Expr::context().member("label"))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.label().as_deref(), Some("fixed"));

    // The overridden rule is gone entirely, not just shadowed.
    stub.set_int(3).unwrap();
    assert_eq!(stub.label().as_deref(), Some("fixed"));
}

#[test]
fn non_overridable_rules_survive_redeclaration() {
    let mut binder = Binder::new(stub_descriptor());
    let survivor = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&survivor);
    binder
        .bind(Expr::context().member("int"))
        .override_key("slot")
        .do_not_override()
        .to_action(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let replacement = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&replacement);
    binder
        .bind(Expr::context().member("int"))
        .override_key("slot")
        .to_action(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(survivor.load(Ordering::SeqCst), 1);
    assert_eq!(replacement.load(Ordering::SeqCst), 1);
}

/// Test that a rule declared non-overridable never cancels a prior rule
/// sharing its key.
#[test]
fn do_not_override_leaves_prior_rules_in_place() {
    let mut binder = Binder::new(stub_descriptor());
    let prior = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&prior);
    binder
        .bind(Expr::context().member("int"))
        .override_key("slot")
        .to_action(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let added = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&added);
    binder
        .bind(Expr::context().member("int"))
        .override_key("slot")
        .do_not_override()
        .to_action(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(prior.load(Ordering::SeqCst), 1);
    assert_eq!(added.load(Ordering::SeqCst), 1);
}

/// Test that replacing an intermediate object re-points the subtree
/// before the rule re-reads.
#[test]
fn nested_replacement_reattaches_and_reruns() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("nested").member("int"))
        .propagate_null_values()
        .to(Expr::context().member("int"))
        .unwrap();

    let stub = Stub::new();
    let first = Stub::new();
    first.set_int(10).unwrap();
    stub.set_nested(Some(Arc::clone(&first))).unwrap();

    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.int(), 10);

    // Changes on the attached nested object propagate.
    first.set_int(11).unwrap();
    assert_eq!(stub.int(), 11);

    // Replacing the nested object swaps subscriptions over.
    let second = Stub::new();
    second.set_int(20).unwrap();
    stub.set_nested(Some(Arc::clone(&second))).unwrap();
    assert_eq!(stub.int(), 20);
    assert_eq!(first.notifier.handler_count(), 0);

    // The abandoned object no longer drives the rule.
    first.set_int(99).unwrap();
    assert_eq!(stub.int(), 20);

    second.set_int(21).unwrap();
    assert_eq!(stub.int(), 21);
}

/// Test that nulls propagate to the target's zero value and recover.
#[test]
fn null_propagation_zeroes_and_recovers() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("nested").member("int"))
        .propagate_null_values()
        .to(Expr::context().member("int"))
        .unwrap();

    let stub = Stub::new();
    let nested = Stub::new();
    nested.set_int(42).unwrap();
    stub.set_nested(Some(Arc::clone(&nested))).unwrap();

    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.int(), 42);

    stub.set_nested(None).unwrap();
    assert_eq!(stub.int(), 0);

    stub.set_nested(Some(nested)).unwrap();
    assert_eq!(stub.int(), 42);
}

/// Test that without null propagation a null intermediate faults the
/// attach.
#[test]
fn strict_null_intermediate_faults() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("nested").member("int"))
        .to(Expr::context().member("int"))
        .unwrap();

    let stub = Stub::new();
    assert!(binder.attach(&obj(&stub)).is_err());
}

/// Test that coalesce absorbs a null result but not, in strict mode, a
/// null receiver on its left side.
#[test]
fn strict_coalesce_faults_on_null_intermediate() {
    let source = || {
        Expr::context()
            .member("nested")
            .member("label")
            .coalesce(Expr::constant("d"))
    };

    let mut binder = Binder::new(stub_descriptor());
    binder.bind(source()).to(Expr::context().member("label")).unwrap();

    let stub = Stub::new();
    assert!(matches!(
        binder.attach(&obj(&stub)),
        Err(BindingError::Execution { .. })
    ));

    // With propagation the same rule falls through to the default.
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(source())
        .propagate_null_values()
        .to(Expr::context().member("label"))
        .unwrap();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.label().as_deref(), Some("d"));
}

/// Test that a write target behind an intermediate follows the current
/// intermediate: replacing it re-assigns into the fresh object.
#[test]
fn nested_target_reassigns_when_parent_is_replaced() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("nested").member("label"))
        .unwrap();

    let stub = Stub::new();
    let first = Stub::new();
    stub.set_nested(Some(Arc::clone(&first))).unwrap();
    stub.set_int(1).unwrap();

    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(first.label().as_deref(), Some("1"));

    stub.set_int(2).unwrap();
    assert_eq!(first.label().as_deref(), Some("2"));

    let second = Stub::new();
    stub.set_nested(Some(Arc::clone(&second))).unwrap();
    assert_eq!(second.label().as_deref(), Some("2"));

    stub.set_int(3).unwrap();
    assert_eq!(second.label().as_deref(), Some("3"));
    assert_eq!(first.label().as_deref(), Some("2"));
}

/// Test that a subtree without a notifier stays static until the member
/// above it raises again.
#[test]
fn non_notifying_intermediates_stay_static_until_reraise() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("quiet").member("value"))
        .propagate_null_values()
        .to(Expr::context().member("int"))
        .unwrap();

    let stub = Stub::new();
    let silent = Arc::new(Silent::default());
    *silent.value.write() = 1;
    *stub.quiet.write() = Some(Arc::clone(&silent));

    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.int(), 1);

    // No notifier on Silent: direct mutation goes unobserved.
    *silent.value.write() = 2;
    assert_eq!(stub.int(), 1);

    // A raise on the member above re-attaches and re-reads.
    stub.notifier.raise("quiet").unwrap();
    assert_eq!(stub.int(), 2);
}

/// Test membership scheduling plus per-item watching through an
/// aggregate.
#[test]
fn collection_aggregate_tracks_membership_and_items() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(
            Expr::context()
                .member("items")
                .count(),
        )
        .to(Expr::context().member("int"))
        .unwrap();
    binder
        .bind(
            Expr::context()
                .member("items")
                .any(Expr::context().member("flag")),
        )
        .to(Expr::context().member("flag"))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.int(), 0);
    assert!(!stub.flag());

    let a = Stub::new();
    stub.items.push(Value::Object(obj(&a))).unwrap();
    assert_eq!(stub.int(), 1);

    // Item member changes re-run the aggregate rule.
    a.set_flag(true).unwrap();
    assert!(stub.flag());

    stub.items.clear().unwrap();
    assert_eq!(stub.int(), 0);
    assert!(!stub.flag());
    assert_eq!(a.notifier.handler_count(), 0);
}

/// Test that removing one of two occurrences keeps the item watched.
#[test]
fn duplicate_item_removal_keeps_watcher() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(
            Expr::context()
                .member("items")
                .any(Expr::context().member("flag")),
        )
        .to(Expr::context().member("flag"))
        .unwrap();

    let stub = Stub::new();
    let item = Stub::new();
    stub.items.push(Value::Object(obj(&item))).unwrap();
    stub.items.push(Value::Object(obj(&item))).unwrap();

    let _handle = binder.attach(&obj(&stub)).unwrap();

    stub.items.remove(&Value::Object(obj(&item))).unwrap();
    item.set_flag(true).unwrap();
    assert!(stub.flag());

    stub.items.remove(&Value::Object(obj(&item))).unwrap();
    assert_eq!(item.notifier.handler_count(), 0);
}

#[test]
fn replace_swaps_item_watchers() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(
            Expr::context()
                .member("items")
                .any(Expr::context().member("flag")),
        )
        .to(Expr::context().member("flag"))
        .unwrap();

    let stub = Stub::new();
    let old = Stub::new();
    stub.items.push(Value::Object(obj(&old))).unwrap();

    let _handle = binder.attach(&obj(&stub)).unwrap();

    let new = Stub::new();
    stub.items.set(0, Value::Object(obj(&new))).unwrap();
    assert_eq!(old.notifier.handler_count(), 0);

    new.set_flag(true).unwrap();
    assert!(stub.flag());
}

/// Test that a transaction batches changes into one drain with one
/// execution per rule.
#[test]
fn transaction_collapses_a_batch() {
    let mut binder = Binder::new(stub_descriptor());
    let counter = count_executions(&mut binder, Expr::context().member("int"));

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let tx = binder.transaction();
    stub.set_int(1).unwrap();
    stub.set_int(2).unwrap();
    stub.set_int(3).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    tx.commit().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

/// Test that a cascading write inside a rule runs the downstream rule
/// in the same drain, once.
#[test]
fn cascading_writes_run_downstream_rules() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("label"))
        .unwrap();
    let label_watch = count_executions(&mut binder, Expr::context().member("label"));

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    let before = label_watch.load(Ordering::SeqCst);

    stub.set_int(8).unwrap();
    assert_eq!(stub.label().as_deref(), Some("8"));
    assert_eq!(label_watch.load(Ordering::SeqCst), before + 1);
}

/// Test that subscriptions are counted and severed exactly.
#[test]
fn detach_severs_all_subscriptions() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("nested").member("int"))
        .propagate_null_values()
        .to(Expr::context().member("int"))
        .unwrap();

    let stub = Stub::new();
    let nested = Stub::new();
    stub.set_nested(Some(Arc::clone(&nested))).unwrap();

    let handle = binder.attach(&obj(&stub)).unwrap();
    assert!(stub.notifier.handler_count() > 0);
    assert!(nested.notifier.handler_count() > 0);

    handle.detach();
    assert_eq!(stub.notifier.handler_count(), 0);
    assert_eq!(nested.notifier.handler_count(), 0);
}

/// Test that a detached tree is reused for the next attachment.
#[test]
fn detached_watchers_are_pooled() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("label"))
        .unwrap();

    let first = Stub::new();
    let handle = binder.attach(&obj(&first)).unwrap();
    handle.detach();

    let second = Stub::new();
    second.set_int(4).unwrap();
    let _handle = binder.attach(&obj(&second)).unwrap();
    assert_eq!(second.label().as_deref(), Some("4"));

    // The first context is fully forgotten.
    first.set_int(9).unwrap();
    assert_eq!(first.label().as_deref(), Some("0"));
}

/// Test that a handled fault lets the rest of the batch run.
#[test]
fn handled_faults_keep_the_drain_alive() {
    let mut binder = Binder::new(stub_descriptor()).with_fault_handler(Arc::new(|fault| {
        fault.handle();
    }));
    binder
        .bind(Expr::context().member("int"))
        .to_action(|_, _| Err(EvalError::Invalid("always fails".to_owned()).into()))
        .unwrap();
    let counter = count_executions(&mut binder, Expr::context().member("int"));

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    stub.set_int(1).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

/// Test that an unhandled fault aborts the drain and surfaces to the
/// mutating caller.
#[test]
fn unhandled_faults_abort_the_drain() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int"))
        .do_not_run_on_attach()
        .to_action(|_, _| Err(EvalError::Invalid("always fails".to_owned()).into()))
        .unwrap();
    let counter = count_executions(&mut binder, Expr::context().member("int"));

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let result = stub.set_int(1);
    assert!(matches!(result, Err(BindingError::Execution { .. })));
    // The second rule was unscheduled with the rest of the queue.
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tether_core::reset_scheduler();
}

/// Test that an unhandled fault reports the rule's source stamp and the
/// rules whose writes led to it.
#[test]
fn faults_carry_stamp_and_trigger_trail() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("label"))
        .unwrap();
    binder
        .bind(Expr::context().member("label"))
        .do_not_run_on_attach()
        .to_action(|_, _| Err(EvalError::Invalid("downstream refused".to_owned()).into()))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();

    match stub.set_int(3).unwrap_err() {
        BindingError::Execution {
            description,
            stamp,
            trail,
            ..
        } => {
            assert_eq!(&*description, "ctx.label => <action>");
            assert_eq!(stamp, "3");
            assert_eq!(trail.len(), 1);
            assert_eq!(&*trail[0], "ctx.int.to_string() => ctx.label");
        }
        other => panic!("expected an execution fault, got {other}"),
    }

    tether_core::reset_scheduler();
}

/// Test that a cloned binder accepts new rules after the original froze.
#[test]
fn cloning_reopens_a_frozen_binder() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("label"))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();

    assert!(matches!(
        binder.bind(Expr::constant(1i64)).to(Expr::context().member("int")),
        Err(tether_core::BinderError::Frozen)
    ));

    let mut clone = binder.clone();
    clone
        .bind(Expr::constant(7i64))
        .to(Expr::context().member("int"))
        .unwrap();

    let other = Stub::new();
    let _handle = clone.attach(&obj(&other)).unwrap();
    assert_eq!(other.int(), 7);
    assert_eq!(other.label().as_deref(), Some("7"));
}

/// Test callback-only rules with explicit dependencies.
#[test]
fn bind_action_observes_declared_dependencies() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&seen);
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind_action(move |ctx: &Obj| {
            inner.lock().push(as_stub(ctx.as_ref()).int());
            Ok(())
        })
        .with_dependency(Expr::context().member("int"))
        .register()
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    stub.set_int(3).unwrap();
    stub.set_int(5).unwrap();
    assert_eq!(&*seen.lock(), &[0, 3, 5]);
}

/// Test that indexer-free list observation also works without items:
/// membership changes alone schedule count rules.
#[test]
fn membership_changes_schedule_without_item_watch() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("items").count())
        .to(Expr::context().member("int"))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();

    stub.items.push(Value::Int(1)).unwrap();
    stub.items.push(Value::Int(2)).unwrap();
    assert_eq!(stub.int(), 2);

    stub.items.remove(&Value::Int(1)).unwrap();
    assert_eq!(stub.int(), 1);
}

/// Test string composition with null propagation, mirroring a
/// greeting-label use case.
#[test]
fn string_composition_handles_missing_parts() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(
            Expr::constant("#")
                .add(Expr::context().member("nested").member("label")),
        )
        .propagate_null_values()
        .to(Expr::context().member("label"))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.label().as_deref(), Some("#"));

    let nested = Stub::new();
    nested.set_label(Some("x".into())).unwrap();
    stub.set_nested(Some(nested)).unwrap();
    assert_eq!(stub.label().as_deref(), Some("#x"));
}

/// Test that both branches of a conditional source are observed.
#[test]
fn conditional_sources_reevaluate_on_either_branch() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&seen);
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::cond(
            Expr::context().member("flag"),
            Expr::context().member("int"),
            Expr::constant(-1i64),
        ))
        .to_action(move |_, value| {
            inner.lock().push(value);
            Ok(())
        })
        .unwrap();

    let stub = Stub::new();
    stub.set_int(5).unwrap();
    let _handle = binder.attach(&obj(&stub)).unwrap();

    // flag flips the branch; int changes re-run even while flag is
    // false because the dependency was extracted statically.
    stub.set_flag(true).unwrap();
    stub.set_int(6).unwrap();
    stub.set_flag(false).unwrap();
    assert_eq!(
        &*seen.lock(),
        &[Value::Int(-1), Value::Int(5), Value::Int(6), Value::Int(-1)]
    );
}

#[test]
fn remove_rule_drops_overridable_rules() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::constant("gone"))
        .override_key("slot")
        .to(Expr::context().member("label"))
        .unwrap();
    binder.remove_rule("slot").unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(stub.label(), None);
}

#[test]
fn action_by_key_runs_surviving_rules() {
    let counter = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&counter);
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int"))
        .override_key("k")
        .do_not_run_on_attach()
        .to_action(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let stub = Stub::new();
    let runner = binder.action_by_key("k").expect("rule under key");
    runner(&obj(&stub)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    assert!(binder.action_by_key("missing").is_none());
}

/// Test that configuration-time checks reject bad declarations before
/// any attach.
#[test]
fn config_time_checks_reject_bad_rules() {
    use tether_core::BinderError;

    let mut binder = Binder::new(stub_descriptor());

    assert!(matches!(
        binder
            .bind(Expr::context().member("missing"))
            .to(Expr::context().member("int")),
        Err(BinderError::UnknownMember { .. })
    ));

    match binder
        .bind(Expr::context().member("flag"))
        .to(Expr::context().member("int"))
    {
        Err(BinderError::TypeMismatch {
            found,
            target,
            member,
        }) => {
            assert_eq!(found, ValueKind::Bool);
            assert_eq!(target, ValueKind::Int);
            assert_eq!(member, "int");
        }
        other => panic!("expected a kind mismatch, got {other:?}"),
    }

    assert!(matches!(
        binder
            .bind(Expr::constant(1i64))
            .to(Expr::context().member("nested")),
        Err(BinderError::UnwritableTarget { .. })
    ));
}

/// Test that a distinct-change filter lives in the setter: writes of an
/// unchanged value do not re-raise.
#[test]
fn unchanged_writes_do_not_cascade() {
    let mut binder = Binder::new(stub_descriptor());
    binder
        .bind(Expr::context().member("int").mul(Expr::constant(0i64)))
        .to(Expr::context().member("int"))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    // Writing 5 triggers the rule, which writes 0, which triggers it
    // again; the second pass writes an unchanged 0 and the cascade
    // stops. This returning at all proves termination.
    stub.set_int(5).unwrap();
    assert_eq!(stub.int(), 0);
}

/// Test the assignment hook wrapping every write.
#[test]
fn assignment_hook_wraps_writes() {
    let wrapped = Arc::new(AtomicI32::new(0));
    let inner = Arc::clone(&wrapped);
    let mut binder = Binder::new(stub_descriptor()).with_assignment_hook(Arc::new(
        move |_, write| {
            inner.fetch_add(1, Ordering::SeqCst);
            write()
        },
    ));
    binder
        .bind(Expr::context().member("int").method("to_string", vec![]))
        .to(Expr::context().member("label"))
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();
    assert_eq!(wrapped.load(Ordering::SeqCst), 1);
    assert_eq!(stub.label().as_deref(), Some("0"));

    stub.set_int(2).unwrap();
    assert_eq!(wrapped.load(Ordering::SeqCst), 2);
}

/// Test list change payloads reach subscribers intact.
#[test]
fn observable_list_reports_changes() {
    let list = ObservableList::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = Arc::clone(&seen);
    list.subscribe(Arc::new(move |change| {
        inner.lock().push(change.clone());
        Ok(())
    }));

    list.push(Value::Int(1)).unwrap();
    list.clear().unwrap();
    assert_eq!(
        &*seen.lock(),
        &[ListChange::Add(Value::Int(1)), ListChange::Reset]
    );
}

struct RecordingTracer {
    events: Mutex<Vec<(&'static str, String)>>,
}

impl tether_core::BindingTracer for RecordingTracer {
    fn scheduled(&self, description: &str) {
        self.events.lock().push(("scheduled", description.to_owned()));
    }

    fn ignored(&self, description: &str) {
        self.events.lock().push(("ignored", description.to_owned()));
    }

    fn started(&self, description: &str) {
        self.events.lock().push(("started", description.to_owned()));
    }

    fn ended(&self, description: &str) {
        self.events.lock().push(("ended", description.to_owned()));
    }

    fn exception(&self, error: &BindingError) {
        self.events.lock().push(("exception", error.to_string()));
    }
}

/// Test every tracer hook: schedule, collapse into an already-queued
/// execution, execution brackets, and exceptions. The tracer is global,
/// so events are filtered down to this rule via the marker constant in
/// its description.
#[test]
fn tracer_observes_scheduling_and_faults() {
    let tracer = Arc::new(RecordingTracer {
        events: Mutex::new(Vec::new()),
    });
    let installed: Arc<dyn tether_core::BindingTracer> = tracer.clone();
    tether_core::set_tracer(Some(installed));

    let mut binder = Binder::new(stub_descriptor()).with_fault_handler(Arc::new(|fault| {
        fault.handle();
    }));
    binder
        .bind(Expr::context().member("int").add(Expr::constant(424242i64)))
        .do_not_run_on_attach()
        .to_action(|ctx, _| {
            if as_stub(ctx.as_ref()).int() == 13 {
                return Err(EvalError::Invalid("marker 424242 refused".to_owned()).into());
            }
            Ok(())
        })
        .unwrap();

    let stub = Stub::new();
    let _handle = binder.attach(&obj(&stub)).unwrap();

    let tx = binder.transaction();
    stub.set_int(1).unwrap();
    stub.set_int(2).unwrap();
    tx.commit().unwrap();

    // The fault is handled, so the mutation itself succeeds.
    stub.set_int(13).unwrap();

    tether_core::set_tracer(None);

    let events = tracer.events.lock();
    let ours: Vec<&str> = events
        .iter()
        .filter(|(_, payload)| payload.contains("424242"))
        .map(|(kind, _)| *kind)
        .collect();
    assert_eq!(
        ours,
        [
            "scheduled",
            "ignored",
            "started",
            "ended",
            "scheduled",
            "started",
            "ended",
            "exception",
        ]
    );
}
