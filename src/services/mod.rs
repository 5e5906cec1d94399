pub mod coverage;
pub mod delivery;
pub mod fees;
pub mod fiscal;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reconciliation;
