//! Capability checks through the public API, without a scheduler.

use std::sync::Arc;

use permflow::{Guarded, KeyChain, Registry, TaskId};

const A: TaskId = TaskId(1);
const B: TaskId = TaskId(2);

#[test]
fn reader_cannot_write() {
    let registry = Registry::new();
    let object = registry.allocate();
    registry.register(A, object).unwrap();
    registry.add_reader(A, object, B).unwrap();

    assert!(registry.check_read(B, object).is_ok());
    assert!(registry.check_write(B, object).unwrap_err().is_access_denied());
}

#[test]
fn replaced_owner_loses_write() {
    let registry = Registry::new();
    let object = registry.new_object(A);
    registry.replace_owner(A, object, B).unwrap();

    assert!(registry.check_write(A, object).unwrap_err().is_access_denied());
    assert!(registry.check_write(B, object).is_ok());
}

#[test]
fn relinking_requires_unlink() {
    let registry = Registry::new();
    let master = registry.new_object(A);
    let master2 = registry.new_object(A);
    let slave = registry.new_object(A);

    registry.link(A, master, slave).unwrap();
    assert!(registry.link(A, master2, slave).is_err());

    registry.unlink(A, slave).unwrap();
    registry.link(A, master2, slave).unwrap();
    assert_eq!(registry.keychain(slave).unwrap(), KeyChain::Delegating(master2));
}

#[test]
fn immutable_objects_are_read_by_everyone() {
    let registry = Arc::new(Registry::new());
    let table = Guarded::new(registry.clone(), A, vec!["a", "b"]);
    registry.freeze_immutable(A, table.id()).unwrap();

    for t in 1..10 {
        assert_eq!(table.read(TaskId(t)).unwrap().len(), 2);
        assert!(table.write(TaskId(t)).is_err());
    }
    assert!(registry.is_immutable(table.id()));
}

#[test]
fn shared_objects_are_written_by_everyone() {
    let registry = Arc::new(Registry::new());
    let counter = Guarded::new(registry.clone(), A, 0);
    registry.freeze_shared(A, counter.id()).unwrap();

    for t in 1..10 {
        *counter.write(TaskId(t)).unwrap() += 1;
    }
    assert_eq!(*counter.read(B).unwrap(), 9);
    assert!(registry.is_shared(counter.id()));
}
