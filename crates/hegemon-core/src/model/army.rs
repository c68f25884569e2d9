use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ArmyId, Coord, PlayerId, RealmId, UnitClassId, UnitId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    pub id: RealmId,
    pub name: String,
    pub player: PlayerId,
}

/// A unit-group on the strategic map. Position changes only through
/// resolved move commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Army {
    pub id: ArmyId,
    pub name: String,
    pub realm: RealmId,
    pub position: Coord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Static combat and mobility stats shared by every unit of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitClass {
    pub id: UnitClassId,
    pub name: String,
    pub melee: i64,
    pub ranged: i64,
    pub defence: i64,
    pub attack_range: i64,
    pub hitpoints: i64,
    pub strategic_speed: i64,
}

impl UnitClass {
    /// Ranged units (reach beyond one tile) fight with their ranged stat.
    pub fn attack_power(&self) -> i64 {
        if self.attack_range > 1 {
            self.ranged
        } else {
            self.melee
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub realm: RealmId,
    pub army: ArmyId,
    pub class: UnitClass,
    pub current_hitpoints: i64,
}

impl Unit {
    pub fn is_alive(&self) -> bool {
        self.current_hitpoints > 0
    }

    pub fn take_damage(&mut self, damage: i64) {
        self.current_hitpoints = (self.current_hitpoints - damage).max(0);
    }
}

/// Movement allowance of an army: the slowest living unit, 1 when none.
pub(crate) fn strategic_speed(units: &[Unit]) -> i64 {
    units
        .iter()
        .filter(|u| u.is_alive())
        .map(|u| u.class.strategic_speed)
        .min()
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(speed: i64, range: i64) -> UnitClass {
        UnitClass {
            id: UnitClassId(1),
            name: "spear".into(),
            melee: 10,
            ranged: 6,
            defence: 4,
            attack_range: range,
            hitpoints: 20,
            strategic_speed: speed,
        }
    }

    fn unit(id: i64, speed: i64, hp: i64) -> Unit {
        Unit {
            id: UnitId(id),
            name: format!("u{id}"),
            realm: RealmId(1),
            army: ArmyId(1),
            class: class(speed, 1),
            current_hitpoints: hp,
        }
    }

    #[test]
    fn speed_is_slowest_living_unit() {
        let units = vec![unit(1, 3, 10), unit(2, 2, 10), unit(3, 1, 0)];
        assert_eq!(strategic_speed(&units), 2);
        assert_eq!(strategic_speed(&[]), 1);
    }

    #[test]
    fn attack_power_depends_on_range() {
        assert_eq!(class(1, 1).attack_power(), 10);
        assert_eq!(class(1, 3).attack_power(), 6);
    }

    #[test]
    fn damage_floors_at_zero() {
        let mut u = unit(1, 1, 5);
        u.take_damage(8);
        assert_eq!(u.current_hitpoints, 0);
        assert!(!u.is_alive());
    }
}
