#[cfg(test)]
mod tests {
    use crate::infrastructure_consul::{kv_path, ConsulKvStore};

    #[test]
    fn test_kv_path_keeps_separators() {
        assert_eq!(kv_path("locks/db/.semaphore"), "/v1/kv/locks/db/.semaphore");
        assert_eq!(kv_path("locks/db/"), "/v1/kv/locks/db/");
        assert_eq!(kv_path("locks/a-b_c~d/x"), "/v1/kv/locks/a-b_c~d/x");
    }

    #[test]
    fn test_kv_path_escapes_url_syntax() {
        assert_eq!(kv_path("locks/db#1/s"), "/v1/kv/locks/db%231/s");
        assert_eq!(kv_path("locks/a?b/s"), "/v1/kv/locks/a%3Fb/s");
        assert_eq!(kv_path("locks/50%/s"), "/v1/kv/locks/50%25/s");
        assert_eq!(kv_path("locks/caf\u{e9}"), "/v1/kv/locks/caf%C3%A9");
    }

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(ConsulKvStore::new("127.0.0.1:8500").base_url(), "http://127.0.0.1:8500");
        assert_eq!(
            ConsulKvStore::new("https://consul.local/").base_url(),
            "https://consul.local"
        );
    }
}
