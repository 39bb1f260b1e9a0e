// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Proquints: pronounceable five-letter words encoding 16 bits each.
//!
//! A 128-bit key seed renders as eight words,
//! `xxxxx-xxxxx-xxxxx-xxxxx.xxxxx-xxxxx-xxxxx-xxxxx`, which users write on
//! paper to back up their keys. Each word is consonant-vowel-consonant-
//! vowel-consonant, 4+2+4+2+4 bits, most significant first.

const CONSONANTS: &[u8; 16] = b"bdfghjklmnprstvz";
const VOWELS: &[u8; 4] = b"aiou";

/// Encode one 16-bit value as a five-letter word.
pub fn encode_word(mut w: u16) -> String {
    let mut out = [0u8; 5];
    out[4] = CONSONANTS[(w & 0xf) as usize];
    w >>= 4;
    out[3] = VOWELS[(w & 0x3) as usize];
    w >>= 2;
    out[2] = CONSONANTS[(w & 0xf) as usize];
    w >>= 4;
    out[1] = VOWELS[(w & 0x3) as usize];
    w >>= 2;
    out[0] = CONSONANTS[(w & 0xf) as usize];
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode a five-letter word; `None` if any letter is out of alphabet.
pub fn decode_word(word: &str) -> Option<u16> {
    let b = word.as_bytes();
    if b.len() != 5 {
        return None;
    }
    let c = |x: u8| CONSONANTS.iter().position(|&v| v == x).map(|p| p as u16);
    let v = |x: u8| VOWELS.iter().position(|&v| v == x).map(|p| p as u16);
    let mut w = c(b[0])?;
    w = (w << 2) | v(b[1])?;
    w = (w << 4) | c(b[2])?;
    w = (w << 2) | v(b[3])?;
    w = (w << 4) | c(b[4])?;
    Some(w)
}

/// Render a 128-bit seed in the backup form users write down.
pub fn encode_seed(seed: &[u8; 16]) -> String {
    let mut out = String::with_capacity(8 * 5 + 7);
    for i in 0..8 {
        if i > 0 {
            out.push(if i == 4 { '.' } else { '-' });
        }
        let w = u16::from_be_bytes([seed[2 * i], seed[2 * i + 1]]);
        out.push_str(&encode_word(w));
    }
    out
}

/// Parse the backup form back into a seed. Separators may be `-` or `.` in
/// any position; `None` on any malformed word.
pub fn decode_seed(s: &str) -> Option<[u8; 16]> {
    let words: Vec<&str> = s.split(['-', '.']).collect();
    if words.len() != 8 {
        return None;
    }
    let mut seed = [0u8; 16];
    for (i, word) in words.iter().enumerate() {
        let w = decode_word(word)?;
        let [hi, lo] = w.to_be_bytes();
        seed[2 * i] = hi;
        seed[2 * i + 1] = lo;
    }
    Some(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_words() {
        // Values from the proquint proposal.
        assert_eq!(encode_word(0x7f00), "lusab");
        assert_eq!(decode_word("lusab"), Some(0x7f00));
        assert_eq!(encode_word(0), "babab");
        assert_eq!(encode_word(0xffff), "zuzuz");
    }

    #[test]
    fn seed_roundtrip() {
        let seed: [u8; 16] = [
            0x00, 0x01, 0x20, 0x34, 0x45, 0x56, 0x67, 0x78, 0x89, 0x9a, 0xab, 0xbc, 0xcd, 0xde,
            0xef, 0xff,
        ];
        let s = encode_seed(&seed);
        assert_eq!(s.len(), 47);
        assert_eq!(s.as_bytes()[23], b'.');
        assert_eq!(decode_seed(&s), Some(seed));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(decode_word("aaaaa"), None);
        assert_eq!(decode_word("lusa"), None);
        assert_eq!(decode_seed("lusab-lusab"), None);
    }
}
