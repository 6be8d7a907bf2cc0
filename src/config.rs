use anyhow::Result;
use serde::Deserialize;

fn default_rpc_max_retries() -> u8 {
    3
}

fn default_rpc_retry_delay_ms() -> u64 {
    500
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub solana_rpc_url: String,
    /// Clé privée du payeur (base58), utilisée par les binaires de démonstration.
    pub payer_private_key: Option<String>,
    /// Nombre de ré-essais des appels RPC en cas d'erreur réseau temporaire.
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u8,
    /// Délai entre deux tentatives RPC.
    #[serde(default = "default_rpc_retry_delay_ms")]
    pub rpc_retry_delay_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()?;
        Ok(config)
    }
}
