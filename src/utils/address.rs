/// Lower-case an address and strip surrounding whitespace so lookups are case-insensitive.
pub fn normalize_address(address: &str) -> String {
	address.trim().to_ascii_lowercase()
}

/// Check that an address is `0x` followed by 20 bytes of hex.
pub fn is_valid_address(address: &str) -> bool {
	match address.trim().strip_prefix("0x") {
		Some(body) => body.len() == 40 && hex::decode(body).is_ok(),
		None => false,
	}
}

/// Extract the address from a 32-byte left-padded log topic.
pub fn topic_to_address(topic: &str) -> Option<String> {
	let bytes = hex::decode(topic.trim_start_matches("0x")).ok()?;
	if bytes.len() != 32 {
		return None;
	}
	Some(format!("0x{}", hex::encode(&bytes[12..32])))
}

/// Left-pad an address into a 32-byte topic for log filters.
pub fn address_to_topic(address: &str) -> String {
	format!(
		"0x{:0>64}",
		normalize_address(address).trim_start_matches("0x")
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn topic_round_trip_normalizes_case() {
		let topic = address_to_topic("0xABCDEF0000000000000000000000000000000001");
		assert_eq!(topic.len(), 66);
		assert_eq!(
			topic_to_address(&topic).as_deref(),
			Some("0xabcdef0000000000000000000000000000000001")
		);
	}

	#[test]
	fn rejects_short_topic() {
		assert_eq!(topic_to_address("0x1234"), None);
	}

	#[test]
	fn validates_addresses() {
		assert!(is_valid_address("0x1111111111111111111111111111111111111111"));
		assert!(!is_valid_address("1111111111111111111111111111111111111111"));
		assert!(!is_valid_address("0x11"));
		assert!(!is_valid_address("0xzz11111111111111111111111111111111111111"));
	}
}
