pub mod bootstrap;
pub mod floating_ip;
pub mod list;
pub mod start;
pub mod stop;
pub mod teardown;
pub mod terminate;
pub mod uninstall;
pub mod validate;
