//! Граница рантаймов: исключительная возможность исполнения, адаптер
//! доставки во внешний рантайм и встроенный Lua.

mod boundary;
mod gate;
pub mod lua;

pub use boundary::{BoundaryCallback, ForeignHandler};
pub use gate::{ExecutionGate, GateScope};
pub use lua::{LuaRepr, LuaRuntime};
