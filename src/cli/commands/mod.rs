mod install;
mod list;
mod progress;

pub(crate) use install::{cmd_install, InstallArgs};
pub(crate) use list::cmd_list;
