pub mod cache_watcher;

pub use cache_watcher::CacheWatcher;
