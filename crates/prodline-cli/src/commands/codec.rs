use anyhow::{Context, Result};

use prodline_types::codec;

/// Encode a plaintext value, printing the `base64://`-prefixed form.
pub fn encode(plaintext: &str) {
    println!("{}", codec::encode(plaintext));
}

/// Decode a `base64://` value, printing the plaintext.
pub fn decode(encoded: &str) -> Result<()> {
    let plaintext = codec::decode(encoded).context("failed to decode value")?;
    println!("{plaintext}");
    Ok(())
}
