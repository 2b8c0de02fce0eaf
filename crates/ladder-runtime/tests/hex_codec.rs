use ladder_runtime::debug::{format_hex, parse_hex};

#[test]
fn parses_space_separated_pairs() {
    assert_eq!(parse_hex("45 de ad"), vec![0x45, 0xDE, 0xAD]);
    assert_eq!(parse_hex("45 DE AD"), vec![0x45, 0xDE, 0xAD]);
}

#[test]
fn skips_extra_spaces() {
    assert_eq!(parse_hex("  41   02 "), vec![0x41, 0x02]);
}

#[test]
fn single_digit_tokens_parse() {
    assert_eq!(parse_hex("4 f"), vec![0x04, 0x0F]);
}

#[test]
fn only_leading_digits_of_a_token_count() {
    // Extra characters after the first two digits are ignored.
    assert_eq!(parse_hex("41ff 02"), vec![0x41, 0x02]);
    assert_eq!(parse_hex("4z 99"), vec![0x04, 0x99]);
}

#[test]
fn stops_at_first_non_hex_token() {
    assert_eq!(parse_hex("41 zz 42"), vec![0x41]);
    assert!(parse_hex("zz 41").is_empty());
    assert!(parse_hex("").is_empty());
    assert!(parse_hex("   ").is_empty());
}

#[test]
fn formats_lowercase_pairs_with_prefix() {
    assert_eq!(format_hex(&[0x45, 0x7E, 0x00], "DEBUG:"), "DEBUG:45 7e 00");
    assert_eq!(format_hex(&[], "DEBUG:"), "DEBUG:");
}

#[test]
fn format_then_parse_round_trips() {
    let cases: Vec<Vec<u8>> = vec![
        vec![0x00],
        vec![0xFF],
        vec![0x41, 0x00, 0x03],
        (0u8..=255).collect(),
    ];
    for bytes in cases {
        let text = format_hex(&bytes, "DEBUG:");
        let stripped = text.strip_prefix("DEBUG:").unwrap();
        assert_eq!(parse_hex(stripped), bytes);
    }
}
