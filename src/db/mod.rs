pub mod credential;
pub mod kusto;

pub use credential::{CredentialResolver, TokenCredential};
pub use kusto::{KustoDb, KustoQuery, KustoTable};
