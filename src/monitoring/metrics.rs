// DANS : src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder, register_histogram,
    register_int_counter, register_int_counter_vec,
};
use warp::Filter;

lazy_static! {
    // --- Envoi ---
    pub static ref TRANSACTIONS_SENT: IntCounter = register_int_counter!(
        "txrelay_broadcasts_total", "Nombre total de diffusions acceptées par le RPC"
    ).unwrap();
    pub static ref SEND_TRANSIENT_ERRORS: IntCounter = register_int_counter!(
        "txrelay_send_transient_errors_total", "Erreurs transitoires rencontrées par la boucle d'envoi (blockhash introuvable, coupures réseau)"
    ).unwrap();

    // --- Confirmation & Issues ---
    pub static ref TRANSACTION_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "txrelay_transaction_outcomes_total",
        "États terminaux des transactions",
        &["outcome"] // Labels: "confirmed", "expired", "timeout", "insufficient_funds", "failed"
    ).unwrap();
    pub static ref CONFIRMATION_LATENCY: Histogram = register_histogram!(
        "txrelay_confirmation_latency_seconds", "Délai entre le lancement de la course envoi/confirmation et la confirmation observée"
    ).unwrap();

    // --- Frais ---
    pub static ref FEE_FALLBACKS: IntCounter = register_int_counter!(
        "txrelay_fee_fallbacks_total", "Nombre d'estimations de frais replies sur la valeur fixe (échantillons indisponibles)"
    ).unwrap();
}

pub async fn start_metrics_server() {
    let metrics_route = warp::path!("metrics").map(|| {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&prometheus::gather(), &mut buffer).unwrap();
        warp::reply::with_header(buffer, "content-type", "text/plain; version=0.0.4")
    });
    println!("[Monitoring] Serveur de métriques exposé sur http://0.0.0.0:9100/metrics");
    warp::serve(metrics_route).run(([0, 0, 0, 0], 9100)).await;
}
