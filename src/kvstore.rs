// kvstore.rs

/// One opened namespace of a persistent key-value store.
///
/// Opening the store for a namespace stands in for `begin(namespace, read_only)`,
/// dropping it for `end()`. Missing keys are `Ok(None)`, not errors.
pub trait KvStore: Send {
    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn put_string(&mut self, key: &str, value: &str) -> anyhow::Result<()>;

    fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>>;
    fn put_bool(&mut self, key: &str, value: bool) -> anyhow::Result<()>;

    fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn put_blob(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()>;
}

impl<T: KvStore + ?Sized> KvStore for Box<T> {
    fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        (**self).get_string(key)
    }
    fn put_string(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        (**self).put_string(key, value)
    }
    fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        (**self).get_bool(key)
    }
    fn put_bool(&mut self, key: &str, value: bool) -> anyhow::Result<()> {
        (**self).put_bool(key, value)
    }
    fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        (**self).get_blob(key)
    }
    fn put_blob(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        (**self).put_blob(key, value)
    }
}

// EOF
