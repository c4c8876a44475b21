#[cfg(test)]
mod tests {
    use crate::codec::{decode, encode};
    use crate::types::HolderMap;

    #[test]
    fn test_encode_is_stable_across_insertion_order() {
        let mut a = HolderMap::new(5);
        a.sessions.insert("s2".to_string(), 2);
        a.sessions.insert("s1".to_string(), 1);

        let mut b = HolderMap::new(5);
        b.sessions.insert("s1".to_string(), 1);
        b.sessions.insert("s2".to_string(), 2);

        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
        assert_eq!(
            encode(&a).unwrap(),
            br#"{"limit":5,"sessions":{"s1":1,"s2":2}}"#.to_vec()
        );
    }

    #[test]
    fn test_reencoding_a_stored_value_reproduces_it() {
        let stored = br#"{"limit":2,"sessions":{"abc":1}}"#;
        let map = decode(stored).unwrap();
        assert_eq!(map.held(), 1);
        assert_eq!(encode(&map).unwrap(), stored.to_vec());
    }

    #[test]
    fn test_missing_sessions_decode_as_empty() {
        let map = decode(br#"{"limit":3}"#).unwrap();
        assert_eq!(map, HolderMap::new(3));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(decode(b"").is_err());
        assert!(decode(b"[1,2]").is_err());
        assert!(decode(br#"{"limit":"two","sessions":{}}"#).is_err());
        assert!(decode(br#"{"limit":2,"sessions":{"s1":-1}}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_overflowing_grants() {
        let err = decode(br#"{"limit":2,"sessions":{"a":18446744073709551615,"b":1}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_decode_rejects_grants_over_limit() {
        assert!(decode(br#"{"limit":2,"sessions":{"a":2,"b":1}}"#).is_err());
        assert!(decode(br#"{"limit":2,"sessions":{"a":1,"b":1}}"#).is_ok());
    }

    #[test]
    fn test_held_saturates_instead_of_overflowing() {
        let mut map = HolderMap::new(2);
        map.sessions.insert("a".to_string(), u64::MAX);
        map.sessions.insert("b".to_string(), 1);
        assert_eq!(map.checked_held(), None);
        assert_eq!(map.held(), u64::MAX);
        assert_eq!(map.available(), 0);
        assert!(!map.is_within_limit());
    }

    #[test]
    fn test_available_saturates() {
        let mut map = HolderMap::new(2);
        map.sessions.insert("a".to_string(), 2);
        map.sessions.insert("b".to_string(), 1);
        assert_eq!(map.available(), 0);
        assert!(!map.is_within_limit());
    }
}
