/*!
 * Descriptor Composition
 */

pub mod composer;
pub mod descriptor;

pub use composer::{ComposeExtras, Composer};
pub use descriptor::{AllowedDevice, BindMount, Descriptor, Fragment, FragmentKind};
