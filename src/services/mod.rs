pub mod ledger;
pub mod mpesa;
pub mod reconcile;
