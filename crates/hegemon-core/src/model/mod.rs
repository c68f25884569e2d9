//! Persistent records the engine reads and writes.

mod army;
mod command;
mod map;
mod turn;

pub(crate) use army::strategic_speed;
pub use army::{Army, Realm, Unit, UnitClass};
pub use command::{
    AttackOrder, Command, CommandKind, CommandStatus, MoveOrder, NewCommand, UnitOrder,
};
pub use map::{Coord, MapBounds, Terrain, Tile};
pub use turn::{Turn, TurnStatus, TurnWindow};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}

row_id!(
    /// Row id of a `game_turns` record.
    TurnId
);
row_id!(
    /// Row id of a `commands` record.
    CommandId
);
row_id!(
    /// Row id of an `armies` record.
    ArmyId
);
row_id!(
    /// Row id of a `units` record.
    UnitId
);
row_id!(UnitClassId);
row_id!(RealmId);
row_id!(PlayerId);
