//! Round-based combat between two co-located armies.

use rand::Rng;
use serde::Serialize;

use crate::error::{EngineResult, ResolutionFailure};
use crate::model::{ArmyId, AttackOrder, Unit, UnitClass, UnitId};
use crate::store::Transaction;

pub const MAX_ROUNDS: u32 = 10;
pub const HIT_CHANCE: f64 = 0.8;
pub const CRIT_CHANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatOutcome {
    AttackerVictory,
    DefenderVictory,
    Inconclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Attacker,
    Defender,
}

/// One unit striking another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatAction {
    pub side: Side,
    pub unit: UnitId,
    pub target: UnitId,
    pub hit: bool,
    pub critical: bool,
    pub damage: i64,
    pub target_hitpoints: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatRound {
    pub round: u32,
    pub actions: Vec<CombatAction>,
}

/// Units killed in this battle, per side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Casualties {
    pub attacker: usize,
    pub defender: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatReport {
    pub attacker_army: ArmyId,
    pub defender_army: ArmyId,
    pub outcome: CombatOutcome,
    pub rounds: Vec<CombatRound>,
    pub casualties: Casualties,
    pub attacker_survivors: usize,
    pub defender_survivors: usize,
}

/// Damage of a landed blow: `max(1, floor(power - defence / 2))`, and half
/// again (floored) on a critical.
pub fn attack_damage(attacker: &UnitClass, defender: &UnitClass, critical: bool) -> i64 {
    let raw = (attacker.attack_power() as f64 - defender.defence as f64 * 0.5).floor() as i64;
    let base = raw.max(1);
    if critical {
        (base as f64 * 1.5).floor() as i64
    } else {
        base
    }
}

/// Index of the living unit with the fewest hitpoints, earliest on ties.
fn weakest(units: &[Unit]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, unit) in units.iter().enumerate() {
        if !unit.is_alive() {
            continue;
        }
        match best {
            Some(b) if units[b].current_hitpoints <= unit.current_hitpoints => {}
            _ => best = Some(i),
        }
    }
    best
}

fn living(units: &[Unit]) -> usize {
    units.iter().filter(|u| u.is_alive()).count()
}

fn phase<R: Rng + ?Sized>(
    side: Side,
    strikers: &[Unit],
    targets: &mut [Unit],
    rng: &mut R,
    actions: &mut Vec<CombatAction>,
) {
    for striker in strikers.iter().filter(|u| u.is_alive()) {
        let Some(t) = weakest(targets) else {
            break;
        };
        let hit = rng.gen::<f64>() < HIT_CHANCE;
        let critical = hit && rng.gen::<f64>() < CRIT_CHANCE;
        let damage = if hit {
            attack_damage(&striker.class, &targets[t].class, critical)
        } else {
            0
        };
        targets[t].take_damage(damage);
        actions.push(CombatAction {
            side,
            unit: striker.id,
            target: targets[t].id,
            hit,
            critical,
            damage,
            target_hitpoints: targets[t].current_hitpoints,
        });
    }
}

/// Fight until one side has no living units or the round cap is hit.
/// Hitpoints are updated in place.
pub fn simulate<R: Rng + ?Sized>(
    attackers: &mut [Unit],
    defenders: &mut [Unit],
    rng: &mut R,
) -> (CombatOutcome, Vec<CombatRound>) {
    let mut rounds = Vec::new();
    for round in 1..=MAX_ROUNDS {
        if living(attackers) == 0 || living(defenders) == 0 {
            break;
        }
        let mut actions = Vec::new();
        phase(Side::Attacker, attackers, defenders, rng, &mut actions);
        phase(Side::Defender, defenders, attackers, rng, &mut actions);
        rounds.push(CombatRound { round, actions });
    }

    let outcome = match (living(attackers), living(defenders)) {
        (a, 0) if a > 0 => CombatOutcome::AttackerVictory,
        (0, d) if d > 0 => CombatOutcome::DefenderVictory,
        _ => CombatOutcome::Inconclusive,
    };
    (outcome, rounds)
}

/// Resolve an attack command for `army`, persisting every participant's
/// final hitpoints.
pub(crate) fn resolve_attack<R: Rng + ?Sized>(
    tx: &mut dyn Transaction,
    rng: &mut R,
    army: ArmyId,
    order: &AttackOrder,
) -> EngineResult<Result<CombatReport, ResolutionFailure>> {
    let Some(attacker) = tx.army(army)? else {
        return Ok(Err(ResolutionFailure::ArmyNotFound(army)));
    };

    let defender = match order.target_army {
        Some(target) => {
            let Some(defender) = tx.army(target)? else {
                return Ok(Err(ResolutionFailure::ArmyNotFound(target)));
            };
            if defender.position != attacker.position {
                return Ok(Err(ResolutionFailure::NotColocated {
                    attacker: attacker.id,
                    defender: defender.id,
                }));
            }
            if defender.realm == attacker.realm {
                return Ok(Err(ResolutionFailure::SameRealm(attacker.id, defender.id)));
            }
            defender
        }
        None => {
            let mut found = None;
            for other in tx.armies_at(attacker.position)? {
                if other.realm != attacker.realm && !tx.units_in_army(other.id)?.is_empty() {
                    found = Some(other);
                    break;
                }
            }
            let Some(defender) = found else {
                return Ok(Err(ResolutionFailure::NoOpponent {
                    x: attacker.position.x,
                    y: attacker.position.y,
                }));
            };
            defender
        }
    };

    let mut attackers = tx.units_in_army(attacker.id)?;
    if attackers.is_empty() {
        return Ok(Err(ResolutionFailure::NoUnits(attacker.id)));
    }
    let mut defenders = tx.units_in_army(defender.id)?;
    if defenders.is_empty() {
        return Ok(Err(ResolutionFailure::NoUnits(defender.id)));
    }

    let attackers_before = living(&attackers);
    let defenders_before = living(&defenders);
    let (outcome, rounds) = simulate(&mut attackers, &mut defenders, rng);

    for unit in attackers.iter().chain(defenders.iter()) {
        tx.set_unit_hitpoints(unit.id, unit.current_hitpoints)?;
    }

    let report = CombatReport {
        attacker_army: attacker.id,
        defender_army: defender.id,
        outcome,
        casualties: Casualties {
            attacker: attackers_before - living(&attackers),
            defender: defenders_before - living(&defenders),
        },
        attacker_survivors: living(&attackers),
        defender_survivors: living(&defenders),
        rounds,
    };
    tracing::info!(
        attacker = %report.attacker_army,
        defender = %report.defender_army,
        outcome = ?report.outcome,
        rounds = report.rounds.len(),
        "Battle resolved"
    );
    Ok(Ok(report))
}
