//! Native standard library.
//!
//! Every operation is registered as a global generic function, so both
//! `append(lst, x)` and the method spelling `lst.append(x)` resolve to the
//! same multimethod. Class member tables additionally carry `init`
//! (constructors), `get_item`/`set_item` (index dispatch) and `get_field`
//! (computed properties).

mod array;
mod file;
mod generic;
mod list;
mod math;
mod regexp;
mod set;
mod string;
mod table;

use merle_core::error::Result;

use crate::runtime::Runtime;

pub(crate) fn register(rt: &mut Runtime) -> Result<()> {
    generic::register(rt)?;
    math::register(rt)?;
    string::register(rt)?;
    list::register(rt)?;
    table::register(rt)?;
    set::register(rt)?;
    array::register(rt)?;
    file::register(rt)?;
    regexp::register(rt)?;
    Ok(())
}
