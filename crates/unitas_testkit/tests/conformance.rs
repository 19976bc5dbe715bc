//! Runs the conformance suite against every bundled store.

use unitas_testkit::conformance;
use unitas_testkit::StoreKind;

#[test]
fn memory_store_conforms() {
    conformance::run_all(StoreKind::Memory);
}

#[test]
fn untracked_memory_store_conforms() {
    conformance::run_all(StoreKind::MemoryUntracked);
}

#[test]
fn journal_store_conforms() {
    conformance::run_all(StoreKind::Journal);
}

#[test]
fn file_journal_store_conforms() {
    conformance::run_all(StoreKind::JournalFile);
}

#[test]
fn preferences_store_conforms() {
    conformance::run_all(StoreKind::Preferences);
}
