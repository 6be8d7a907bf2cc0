pub mod types;            // Les types partagés du pipeline (demandes, options, issues).
pub mod errors;           // Taxonomie d'erreurs, traduction et classification.
pub mod fee_manager;      // Estimation des frais de priorité.
pub mod cu_manager;       // Injection des instructions de budget de calcul.
pub mod transaction_builder; // Assemblage et contrat de signature.
pub mod sender;           // La boucle d'envoi fiable.
pub mod confirmation_service; // Le suivi de confirmation.
pub mod coordinator;      // La course envoi/confirmation, avec annulation.
pub mod executor;         // Le point d'entrée public (unitaire et lot).
