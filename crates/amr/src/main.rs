use std::sync::Arc;

use amr_core::{
    config::Config,
    ports::{PseudonymGenerator, Storage},
    pseudonym::WordlistPseudonyms,
    storage::MemoryStorage,
};

#[tokio::main]
async fn main() -> Result<(), amr_core::Error> {
    amr_core::logging::init("amr")?;

    let cfg = Config::load()?;

    let storage: Arc<dyn Storage> = match &cfg.data_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading snapshot");
            Arc::new(MemoryStorage::open(path.clone()).await?)
        }
        None => {
            tracing::warn!("DATA_FILE not set; mailboxes and posts live in memory only");
            Arc::new(MemoryStorage::new())
        }
    };
    let pseudonyms: Arc<dyn PseudonymGenerator> = Arc::new(WordlistPseudonyms);

    amr_telegram::router::run_polling(cfg, storage, pseudonyms)
        .await
        .map_err(|e| amr_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
