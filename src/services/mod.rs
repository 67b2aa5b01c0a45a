// Order-side building blocks
pub mod carts;
pub mod inventory;
pub mod orders;

// Payment intent lifecycle
pub mod finalizer;
pub mod intent_lifecycle;
pub mod payments;

// Browser-facing checkout pieces
pub mod checkout_form;
