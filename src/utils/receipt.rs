use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generates a platform transaction id: `TX` + base36 millis + 6 random chars.
pub fn generate_transaction_id() -> String {
    format!("TX{}{}", base36_millis(), random_suffix(6))
}

/// Generates a receipt number: `RC` + base36 millis + 4 random chars.
pub fn generate_receipt_number() -> String {
    format!("RC{}{}", base36_millis(), random_suffix(4))
}

fn base36_millis() -> String {
    to_base36(Utc::now().timestamp_millis() as u64)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
