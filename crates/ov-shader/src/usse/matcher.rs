//! Bit-pattern matcher for USSE instruction families
//!
//! Each family is described by a 64-character string, MSB first. `0` and
//! `1` are fixed bits, `-` is don't-care and every letter names a field
//! whose bits are concatenated in order of appearance.

use once_cell::sync::Lazy;

/// Instruction family selected by the matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Vmov,
    Vmad,
    Vmad2,
    Vnmad32,
    Vnmad16,
    Vpck,
    Sop2,
    Vtst,
    Vtstmsk,
    Vbw,
    Phas,
    Nop,
    Br,
    Smp,
    Smlsi,
    Kill,
    Spec,
    Vcomp,
    Vdp,
    Vdual,
    Vldst,
}

/// Location of one field inside the instruction word
#[derive(Debug, Clone, Copy)]
struct FieldLayout {
    letter: u8,
    /// Bit positions, most significant first
    bits: [u8; 32],
    len: u8,
}

/// A compiled bit pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    pub family: Family,
    mask: u64,
    expected: u64,
    fields: Vec<FieldLayout>,
}

impl Pattern {
    fn compile(family: Family, text: &str) -> Self {
        let mut mask = 0u64;
        let mut expected = 0u64;
        let mut fields: Vec<FieldLayout> = Vec::new();

        // Short patterns leave the low bits unconstrained
        let padded = text.bytes().chain(std::iter::repeat(b'-')).take(64);
        for (i, ch) in padded.enumerate() {
            let bit = 63 - i as u8;
            match ch {
                b'0' => mask |= 1 << bit,
                b'1' => {
                    mask |= 1 << bit;
                    expected |= 1 << bit;
                }
                b'-' => {}
                letter => match fields.iter_mut().find(|f| f.letter == letter) {
                    Some(field) => {
                        field.bits[field.len as usize] = bit;
                        field.len += 1;
                    }
                    None => {
                        let mut field = FieldLayout {
                            letter,
                            bits: [0; 32],
                            len: 1,
                        };
                        field.bits[0] = bit;
                        fields.push(field);
                    }
                },
            }
        }

        Self {
            family,
            mask,
            expected,
            fields,
        }
    }

    pub fn matches(&self, word: u64) -> bool {
        word & self.mask == self.expected
    }

    /// Bind this pattern's fields to a word
    pub fn fields(&self, word: u64) -> Fields<'_> {
        Fields {
            pattern: self,
            word,
        }
    }
}

/// Field accessor for a matched word
#[derive(Clone, Copy)]
pub struct Fields<'a> {
    pattern: &'a Pattern,
    word: u64,
}

impl Fields<'_> {
    /// Value of the field named by `letter`, or 0 if the pattern has none
    pub fn get(&self, letter: char) -> u32 {
        let letter = letter as u8;
        let Some(field) = self.pattern.fields.iter().find(|f| f.letter == letter) else {
            return 0;
        };
        field.bits[..field.len as usize]
            .iter()
            .fold(0u32, |acc, &bit| (acc << 1) | ((self.word >> bit) & 1) as u32)
    }

    pub fn flag(&self, letter: char) -> bool {
        self.get(letter) != 0
    }
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    [
        (Family::Vmov, "00111pppstrydecbmmaanoooiwwwwkllffgghhhhjjjjjjqqqqqquuuuuuvvvvvv"),
        (Family::Vmad, "00011pppsg1oderiiattnwwwwcbfhzkkjjllmmmmmmqqqquuuuvvxyAAAABBBBBB"),
        (Family::Vmad2, "00000dpps-ry-cbawwwineeeemmookttffgghhhhhhzzjjllllllqqqqqquuuuuu"),
        (Family::Vnmad32, "00001pppsrrydcbawwwwneeeemmoiittkkllffffffzzzzzzzggghhhhhhjjjjjj"),
        (Family::Vnmad16, "00010pppsrrydcbawwwwneeeemmoiittkkllffffffzzzzzzzggghhhhhhjjjjjj"),
        (Family::Vpck, "01000pppsnuyderc-aaaffftttmmmmbbkkllgggggggoohiijjqqqqqqvwwwwwwx"),
        (Family::Sop2, "10000ppcsnaaderbmooofllggghhhittkkjjqqqqqqquvvwwxyzzzzzzzAAAAAAA"),
        (Family::Vtst, "01001ppps-oydrceavttiizzmhhhnnbbkkffgggggggwlluuuujjjjjjjqqqqqqq"),
        (Family::Vtstmsk, "01111ppps-oydtrcevuuiizzm-aa--bbnnkkfffffffwllgggghhhhhhhjjjjjjj"),
        (Family::Vbw, "01ooopppsnrydecxmmmmittttthhabkkffggjjjjjjjlllllllqqqqqqquuuuuuu"),
        (Family::Phas, "11111----100-"),
        (Family::Nop, "11111----000-----------101-"),
        (Family::Br, "11111ppps000e-----wynba00r----------------iloooooooooooooooooooo"),
        (Family::Smp, "11100pppsn-ymrceffaaddlltbbggkhhiijjoooooooqqqqqqquuuuuuuvvvvvvv"),
        (Family::Smlsi, "11111010--01-n--ttttppppssssdrcieeeeeeeeaaaaaaaabbbbbbbbffffffff"),
        (Family::Kill, "11111001--11000000000pp00000011011110000000000000000000000000000"),
        (Family::Spec, "11111----scc-"),
        (Family::Vcomp, "00110pppsddyenr-aaaaobbccmmff-ttkk--ggggggg-------hhhhhhh---wwww"),
        (Family::Vdp, "00011pppsc0oderiigaanwwwwbflllttkkhhjjjjjjzzzzmmmqqqyyyxxxuuuuuu"),
        (Family::Vdual, "0010cgsskdtpuuuunaaalriiiiwwwwmmffeebbbbbbbooohhjqvvxxyyyzzzzzzz"),
        (Family::Vldst, "111oopppsnmycrbakkkkddeetgffihjlqquuvvvvvvvwwwwwwwxxxxxxxzzzzzzz"),
    ]
    .into_iter()
    .map(|(family, text)| Pattern::compile(family, text))
    .collect()
});

/// First pattern matching `word`, in table order
pub fn match_word(word: u64) -> Option<&'static Pattern> {
    PATTERNS.iter().find(|p| p.matches(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_lengths() {
        for pattern in PATTERNS.iter() {
            // VBW fixes only its top two bits and relies on table order for the rest
            assert!(pattern.mask.count_ones() >= 2, "{:?}", pattern.family);
        }
        assert_eq!(PATTERNS.len(), 21);
    }

    #[test]
    fn test_field_extraction() {
        let pattern = Pattern::compile(Family::Vmov, "1aa0b-ab");
        let word = 0b1100_1011u64 << 56;
        let fields = pattern.fields(word);
        assert!(pattern.matches(word));
        // a bits at positions 62, 61, 57 => 1, 0, 1
        assert_eq!(fields.get('a'), 0b101);
        assert_eq!(fields.get('b'), 0b11);
        assert_eq!(fields.get('z'), 0);
    }

    #[test]
    fn test_match_order() {
        // NOP lives inside the special opcode space and must not be mistaken for a branch
        let nop = 0xF800_0000_0000_0000u64 | (0b101u64 << 38);
        assert_eq!(match_word(nop).map(|p| p.family), Some(Family::Nop));

        let br = 0xF800_0000_0000_0010u64;
        assert_eq!(match_word(br).map(|p| p.family), Some(Family::Br));
    }

    #[test]
    fn test_bitwise_after_specific_families() {
        // The 01xxx space is shared: VPCK, VTST and VTSTMSK take their opcodes first
        let family = |major: u64| match_word(major << 59).map(|p| p.family);
        assert_eq!(family(0b01000), Some(Family::Vpck));
        assert_eq!(family(0b01001), Some(Family::Vtst));
        assert_eq!(family(0b01111), Some(Family::Vtstmsk));
        for major in 0b01010..=0b01110u64 {
            assert_eq!(family(major), Some(Family::Vbw), "{:05b}", major);
        }
    }

    #[test]
    fn test_vmad_before_vdp() {
        // VMAD and VDP share the 00011 prefix; bit 53 selects VMAD
        let vmad = (0b00011u64 << 59) | (1 << 53);
        assert_eq!(match_word(vmad).map(|p| p.family), Some(Family::Vmad));
        let vdp = 0b00011u64 << 59;
        assert_eq!(match_word(vdp).map(|p| p.family), Some(Family::Vdp));
    }
}
