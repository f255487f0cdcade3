mod dispatch_service;
mod history_service;
mod persister;

pub use dispatch_service::{DispatchService, DispatchServiceDependencies};
pub use history_service::{HistoryService, HistoryServiceDependencies};
pub use persister::{BatchPersister, BatchPersisterDependencies};

#[cfg(test)]
mod persister_tests;
