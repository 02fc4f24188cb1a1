pub mod get;
pub mod ls;
pub mod mv;
pub mod notify;
pub mod put;
pub mod report;
pub mod rm;
pub mod stat;
pub mod watch;

pub use get::Get;
pub use ls::Ls;
pub use mv::Mv;
pub use notify::Notify;
pub use put::Put;
pub use report::Report;
pub use rm::Rm;
pub use stat::Stat;
pub use watch::Watch;
