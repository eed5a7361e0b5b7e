use std::fmt::Write;

/// Lowercase hex, no separators.
pub fn to_hex_str<T>(bytes: &T) -> String
where
    T: AsRef<[u8]> + ?Sized,
{
    let bytes = bytes.as_ref();

    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, v| {
            let _ = write!(acc, "{:02x}", v);
            acc
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex() {
        assert_eq!(to_hex_str(&[0x00u8, 0x1A, 0xFF]), "001aff");
        assert_eq!(to_hex_str(&Vec::<u8>::new()), "");
    }
}
