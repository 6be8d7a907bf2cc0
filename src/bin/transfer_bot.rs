// Binaire de démonstration: envoie un transfert SOL à travers le pipeline
// complet (simulation, budget de calcul, course envoi/confirmation).
//
// Usage: transfer_bot <DESTINATAIRE> [LAMPORTS]

use anyhow::{Context, Result, bail};
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer, system_instruction};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use txrelay::config::Config;
use txrelay::execution::executor::TransactionExecutor;
use txrelay::execution::transaction_builder::LocalSigner;
use txrelay::execution::types::{ExecutionOptions, TransactionRequest};
use txrelay::monitoring::{logging, metrics};
use txrelay::rpc::ResilientRpcClient;

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging();
    let config = Config::load()?;

    let mut args = env::args().skip(1);
    let Some(recipient) = args.next() else {
        bail!("Usage: transfer_bot <DESTINATAIRE> [LAMPORTS]");
    };
    let recipient = Pubkey::from_str(&recipient)
        .with_context(|| format!("Adresse de destinataire invalide: {recipient}"))?;
    let lamports: u64 = match args.next() {
        Some(raw) => raw.parse().context("Montant en lamports invalide")?,
        None => 10_000,
    };

    let private_key = config
        .payer_private_key
        .as_deref()
        .context("PAYER_PRIVATE_KEY manquant dans l'environnement")?;
    let key_bytes = bs58::decode(private_key)
        .into_vec()
        .context("PAYER_PRIVATE_KEY n'est pas du base58 valide")?;
    let payer = Arc::new(
        Keypair::try_from(key_bytes.as_slice()).context("PAYER_PRIVATE_KEY n'est pas une paire de clés valide")?,
    );

    tokio::spawn(metrics::start_metrics_server());

    let rpc_client = Arc::new(ResilientRpcClient::new(
        config.solana_rpc_url.clone(),
        config.rpc_max_retries,
        config.rpc_retry_delay_ms,
    ));
    let signer = Arc::new(LocalSigner::new(vec![payer.clone()]));
    let executor = TransactionExecutor::new(rpc_client, signer);

    let instruction = system_instruction::transfer(&payer.pubkey(), &recipient, lamports);
    let request = TransactionRequest::new(vec![instruction], payer.pubkey())?;
    let options = ExecutionOptions::default();

    info!(payeur = %payer.pubkey(), %recipient, lamports, "Envoi du transfert...");
    match executor.execute(request, &options).await {
        Ok(signature) => {
            info!(%signature, "Transfert confirmé.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Échec du transfert.");
            std::process::exit(1);
        }
    }
}
