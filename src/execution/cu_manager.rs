// DANS : src/execution/cu_manager.rs

use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::Instruction,
};

use crate::execution::types::TransactionRequest;

/// Budget utilisé quand la simulation n'a pas rapporté de consommation.
pub const DEFAULT_CU_LIMIT: u64 = 200_000;
/// Plafond réseau d'une transaction.
pub const MAX_CU_LIMIT: u64 = 1_400_000;
/// Frais de base d'une transaction à une signature, en lamports.
pub const BASE_FEE_LAMPORTS: u64 = 5_000;

// Premier octet des instructions ComputeBudget.
const SET_COMPUTE_UNIT_LIMIT_OPCODE: u8 = 2;
const SET_COMPUTE_UNIT_PRICE_OPCODE: u8 = 3;

/// Budget de compute units à déclarer: la consommation simulée plus une marge
/// de sécurité multiplicative (politique retenue: +10 % par défaut, le même
/// garde-fou que sur nos estimations de swap), bornée au plafond réseau.
pub fn padded_cu_limit(simulated_units: Option<u64>, margin_percent: u64) -> u64 {
    match simulated_units {
        Some(units) if units > 0 => {
            let margin = (units * margin_percent) / 100;
            (units + margin).min(MAX_CU_LIMIT)
        }
        _ => DEFAULT_CU_LIMIT,
    }
}

/// Convertit un budget total de frais de priorité (lamports) en prix par compute
/// unit (micro-lamports): on retranche le frais de base puis on répartit sur le
/// budget de CUs déclaré.
pub fn price_from_total_fee(total_fee_lamports: u64, cu_limit: u64) -> u64 {
    let priority_lamports = total_fee_lamports.saturating_sub(BASE_FEE_LAMPORTS);
    priority_lamports.saturating_mul(1_000_000) / cu_limit.max(1)
}

fn has_budget_instruction(instructions: &[Instruction], opcode: u8) -> bool {
    instructions.iter().any(|ix| {
        ix.program_id == compute_budget::id() && ix.data.first() == Some(&opcode)
    })
}

/// Injecte les instructions de budget de calcul en tête de la demande si elles
/// n'y figurent pas déjà. Idempotent: deux appels successifs ne dupliquent rien.
/// Ordre final: [limit, price, ...instructions d'origine].
pub fn apply_compute_budget(request: &mut TransactionRequest, cu_limit: u64, price_microlamports: u64) {
    let has_limit = has_budget_instruction(&request.instructions, SET_COMPUTE_UNIT_LIMIT_OPCODE);
    let has_price = has_budget_instruction(&request.instructions, SET_COMPUTE_UNIT_PRICE_OPCODE);

    if !has_price {
        request.instructions.insert(
            0,
            ComputeBudgetInstruction::set_compute_unit_price(price_microlamports),
        );
    }
    if !has_limit {
        request.instructions.insert(
            0,
            ComputeBudgetInstruction::set_compute_unit_limit(cu_limit.min(MAX_CU_LIMIT) as u32),
        );
    }
}
