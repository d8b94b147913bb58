pub mod system;

pub use system::SysinfoProvider;
