//! Repeat offset tracking
//!
//! A repeated instruction runs several times with its operand registers
//! advanced between iterations. How far each operand moves depends on the
//! instruction's repeat mode, the operand's bank and the increments last
//! configured by SMLSI.

use super::types::{Opcode, Operand, OperandSlot, RegisterBank, RegisterFlags, RepeatMode};

/// Highest repeat index the increment tables cover
pub const MAX_REPEAT: usize = 16;

const DEFAULT_MULTIPLIER: i32 = 2;

/// Repeat state carried across instructions of one program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatSession {
    /// Per-slot increment for every repeat index, rows in [`OperandSlot`] order
    increase: [[i32; MAX_REPEAT + 1]; 4],
    multiplier: [i32; 4],
}

impl Default for RepeatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatSession {
    pub fn new() -> Self {
        let mut session = Self {
            increase: [[0; MAX_REPEAT + 1]; 4],
            multiplier: [DEFAULT_MULTIPLIER; 4],
        };
        session.reset();
        session
    }

    /// Restore the power-on increments and multipliers
    pub fn reset(&mut self) {
        for row in self.increase.iter_mut() {
            for (j, inc) in row.iter_mut().enumerate() {
                *inc = j as i32;
            }
        }
        self.reset_multiplier();
    }

    pub fn set_multiplier(&mut self, multiplier: [i32; 4]) {
        self.multiplier = multiplier;
    }

    pub fn reset_multiplier(&mut self) {
        self.multiplier = [DEFAULT_MULTIPLIER; 4];
    }

    pub fn multiplier(&self) -> [i32; 4] {
        self.multiplier
    }

    /// Install the increments of an SMLSI instruction
    ///
    /// `increments` and `swizzle_mode` are in src0, src1, src2, dest order.
    pub fn apply_smlsi(&mut self, increments: [u8; 4], swizzle_mode: [bool; 4]) {
        for (slot, row) in self.increase.iter_mut().enumerate() {
            let inc = increments[slot];
            for (j, value) in row.iter_mut().enumerate() {
                *value = if swizzle_mode[slot] {
                    ((inc as u32 >> ((j % 4) * 2)) & 3) as i32
                } else {
                    j as i32 * (inc as i8) as i32
                };
            }
        }
    }

    /// Register offset of `op` at repeat iteration `index`
    pub fn offset(&self, op: &Operand, mode: RepeatMode, index: u32) -> i32 {
        let index_i = index as i32;
        let internal = op.bank == RegisterBank::FpInternal;

        if mode == RepeatMode::Internal && internal {
            return index_i;
        }
        // GPI operands only advance in internal mode
        if op.flags.contains(RegisterFlags::GPI) {
            return 0;
        }
        match mode {
            RepeatMode::Both if internal => index_i,
            RepeatMode::Both => index_i * 4,
            RepeatMode::External if !internal => index_i * 4,
            RepeatMode::Slmsi => {
                let slot = op.slot as usize;
                let column = (index as usize).min(MAX_REPEAT);
                let inc = self.increase[slot][column];
                if op.bank.uses_repeat_multiplier() {
                    inc * self.multiplier[slot]
                } else {
                    inc
                }
            }
            _ => 0,
        }
    }

    pub fn slot_increment(&self, slot: OperandSlot, index: usize) -> i32 {
        self.increase[slot as usize][index.min(MAX_REPEAT)]
    }
}

/// Per-family multiplier override, applied for one instruction only
///
/// Returns None for families that keep the default stride.
pub fn family_multiplier(opcode: Opcode, dest_float: bool, src_float: bool) -> Option<[i32; 4]> {
    match opcode {
        Opcode::Vmad | Opcode::Vf16mad => Some([2, 2, 2, 4]),
        Opcode::Vmov | Opcode::Vmovc | Opcode::Vmovcu8 if dest_float => Some([2, 2, 2, 2]),
        Opcode::Vmov | Opcode::Vmovc | Opcode::Vmovcu8 => Some([1, 1, 1, 1]),
        Opcode::Vpck if src_float => Some([1, 2, 2, 1]),
        Opcode::Vpck => Some([1, 1, 1, 1]),
        Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Rol
        | Opcode::Asr => Some([1, 1, 1, 1]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operand(slot: OperandSlot, bank: RegisterBank) -> Operand {
        let mut op = Operand::new(slot);
        op.bank = bank;
        op
    }

    #[test]
    fn test_default_increments() {
        let session = RepeatSession::new();
        let temp = operand(OperandSlot::Src1, RegisterBank::Temp);
        assert_eq!(session.offset(&temp, RepeatMode::Slmsi, 0), 0);
        assert_eq!(session.offset(&temp, RepeatMode::Slmsi, 3), 6);

        // Constants are not scaled by the multiplier
        let constant = operand(OperandSlot::Src1, RegisterBank::FpConstant);
        assert_eq!(session.offset(&constant, RepeatMode::Slmsi, 3), 3);
    }

    #[test]
    fn test_external_mode() {
        let session = RepeatSession::new();
        let temp = operand(OperandSlot::Dest, RegisterBank::Temp);
        let offsets: Vec<i32> = (0..4)
            .map(|i| session.offset(&temp, RepeatMode::External, i))
            .collect();
        assert_eq!(offsets, vec![0, 4, 8, 12]);

        let internal = operand(OperandSlot::Dest, RegisterBank::FpInternal);
        assert_eq!(session.offset(&internal, RepeatMode::External, 2), 0);
        assert_eq!(session.offset(&internal, RepeatMode::Both, 2), 2);
    }

    #[test]
    fn test_gpi_operands() {
        let session = RepeatSession::new();
        let mut gpi = operand(OperandSlot::Src0, RegisterBank::FpInternal);
        gpi.flags = RegisterFlags::GPI;
        assert_eq!(session.offset(&gpi, RepeatMode::Internal, 3), 3);
        assert_eq!(session.offset(&gpi, RepeatMode::Both, 3), 0);
        assert_eq!(session.offset(&gpi, RepeatMode::Slmsi, 3), 0);
    }

    #[test]
    fn test_smlsi_increment_mode() {
        let mut session = RepeatSession::new();
        // src1 steps backwards by one, dest by three
        session.apply_smlsi([1, 0xFF, 0, 3], [false; 4]);
        assert_eq!(session.slot_increment(OperandSlot::Src1, 2), -2);
        assert_eq!(session.slot_increment(OperandSlot::Dest, 2), 6);
        assert_eq!(session.slot_increment(OperandSlot::Src2, 5), 0);

        session.set_multiplier([1, 1, 1, 1]);
        let dest = operand(OperandSlot::Dest, RegisterBank::Output);
        assert_eq!(session.offset(&dest, RepeatMode::Slmsi, 1), 3);
        session.reset_multiplier();
        assert_eq!(session.offset(&dest, RepeatMode::Slmsi, 1), 6);
    }

    #[test]
    fn test_smlsi_swizzle_mode() {
        let mut session = RepeatSession::new();
        // 2-bit steps 1, 3, 0, 2 from the low bits up
        session.apply_smlsi([0b10_00_11_01, 0, 0, 0], [true, false, false, false]);
        let steps: Vec<i32> = (0..6)
            .map(|j| session.slot_increment(OperandSlot::Src0, j))
            .collect();
        assert_eq!(steps, vec![1, 3, 0, 2, 1, 3]);

        session.reset();
        assert_eq!(session, RepeatSession::new());
    }

    #[test]
    fn test_family_multipliers() {
        assert_eq!(family_multiplier(Opcode::Vmad, true, true), Some([2, 2, 2, 4]));
        assert_eq!(family_multiplier(Opcode::Vmov, false, false), Some([1; 4]));
        assert_eq!(family_multiplier(Opcode::Vpck, false, true), Some([1, 2, 2, 1]));
        assert_eq!(family_multiplier(Opcode::Vrcp, true, true), None);
    }
}
