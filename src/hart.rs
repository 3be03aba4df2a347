//! Single-hart fetch-execute engine
//!
//! A [`Hart`] owns its register file and CSR table and borrows the
//! memory it executes from, so the driver keeps access to the memory
//! for disassembly and dumps. Each call to [`Hart::tick`] executes at
//! most one instruction; once the halt latch is set, ticks do nothing
//! until the next [`Hart::reset`].
//!
//! Tracing is a pure side effect: handlers compute identical state
//! changes whether or not a trace sink is passed in. The sink receives
//! the rendered instruction left-justified in a 35-column field
//! followed by a `//` comment describing the effect.

use crate::decode;
use crate::hex;
use crate::memory::Memory;
use crate::opcodes::*;
use crate::registers::RegisterFile;
use std::fmt::Write;

/// Number of control-and-status register slots (12-bit address space)
const CSR_COUNT: usize = 4096;

/// Column width of the rendered-instruction field in trace lines
const INSTRUCTION_WIDTH: usize = 35;

/// Behaviour of a CSR read-modify-write instruction
#[derive(Debug, Clone, Copy)]
enum CsrOp {
    Write,
    Set,
    Clear,
}

fn push_rendered(out: &mut String, rendered: &str) {
    let _ = write!(out, "{rendered:<width$}", width = INSTRUCTION_WIDTH);
}

#[derive(Debug)]
pub struct Hart<'a> {
    mem: &'a mut Memory,
    regs: RegisterFile,
    pc: u32,
    insn_counter: u64,
    halt: bool,
    halt_reason: String,
    csrs: Vec<u32>,
    show_instructions: bool,
    show_registers: bool,
}

impl<'a> Hart<'a> {
    pub fn new(mem: &'a mut Memory) -> Self {
        Self {
            mem,
            regs: RegisterFile::new(),
            pc: 0,
            insn_counter: 0,
            halt: false,
            halt_reason: String::from("none"),
            csrs: vec![0; CSR_COUNT],
            show_instructions: false,
            show_registers: false,
        }
    }

    /// Clear registers, pc, the instruction counter, the halt latch and
    /// all CSRs. Memory is not touched.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.insn_counter = 0;
        self.halt = false;
        self.halt_reason = String::from("none");
        self.regs.reset();
        self.csrs.fill(0);
    }

    /// Enable the per-instruction trace line
    pub fn set_show_instructions(&mut self, show: bool) {
        self.show_instructions = show;
    }

    /// Enable the register dump at the start of every tick
    pub fn set_show_registers(&mut self, show: bool) {
        self.show_registers = show;
    }

    pub fn is_halted(&self) -> bool {
        self.halt
    }

    pub fn halt_reason(&self) -> &str {
        &self.halt_reason
    }

    pub fn insn_counter(&self) -> u64 {
        self.insn_counter
    }

    /// Dump the register file and the pc, prefixing every line with hdr
    pub fn dump(&self, hdr: &str) {
        self.regs.dump(hdr);
        println!("{hdr} pc {}", hex::to_hex32(self.pc));
    }

    /// Execute one instruction, unless the hart is halted. A misaligned
    /// pc halts the hart before the fetch and does not count an
    /// instruction.
    pub fn tick(&mut self, hdr: &str) {
        if self.halt {
            return;
        }
        if self.show_registers {
            self.dump(hdr);
        }
        if self.pc & 0x3 != 0 {
            self.halt = true;
            self.halt_reason = String::from("PC alignment error");
            return;
        }
        self.insn_counter += 1;
        let insn = self.mem.get32(self.pc);
        if self.show_instructions {
            let mut line = String::new();
            let _ = write!(
                line,
                "{hdr}{}: {}  ",
                hex::to_hex0x32(self.pc),
                hex::to_hex32(insn)
            );
            self.exec(insn, Some(&mut line));
            println!("{line}");
        } else {
            self.exec(insn, None);
        }
    }

    /// Tick until the hart halts, or until exec_limit instructions have
    /// executed (0 means no limit), then print the accounting lines.
    /// Register x2 is seeded with the memory size so programs can find
    /// the top of memory. Hitting the limit does not set the halt
    /// latch.
    pub fn run(&mut self, exec_limit: u64) {
        self.regs.set(2, self.mem.size() as i32);

        if exec_limit == 0 {
            while !self.halt {
                self.tick("");
            }
        } else {
            while !self.halt && self.insn_counter < exec_limit {
                self.tick("");
            }
        }

        if self.halt {
            println!("Execution terminated. Reason: {}", self.halt_reason);
        }
        println!("{} instructions executed", self.insn_counter);
    }

    fn exec(&mut self, insn: u32, pos: Option<&mut String>) {
        match decode::get_opcode(insn) {
            OP_LUI => self.exec_lui(insn, pos),
            OP_AUIPC => self.exec_auipc(insn, pos),
            OP_JAL => self.exec_jal(insn, pos),
            OP_JALR => self.exec_jalr(insn, pos),
            OP_BRANCH => self.exec_branch(insn, pos),
            OP_LOAD => self.exec_load(insn, pos),
            OP_STORE => self.exec_store(insn, pos),
            OP_IMM => self.exec_alu_imm(insn, pos),
            OP => self.exec_alu_reg(insn, pos),
            OP_SYSTEM => self.exec_system(insn, pos),
            _ => self.exec_illegal_insn(insn, pos),
        }
    }

    fn exec_system(&mut self, insn: u32, pos: Option<&mut String>) {
        match decode::get_funct3(insn) {
            FUNCT3_PRIV => match insn {
                INSN_ECALL => self.exec_ecall(pos),
                INSN_EBREAK => self.exec_ebreak(pos),
                _ => self.exec_illegal_insn(insn, pos),
            },
            FUNCT3_CSRRW => self.exec_csrrx(insn, pos, CsrOp::Write, "csrrw"),
            FUNCT3_CSRRS => self.exec_csrrx(insn, pos, CsrOp::Set, "csrrs"),
            FUNCT3_CSRRC => self.exec_csrrx(insn, pos, CsrOp::Clear, "csrrc"),
            FUNCT3_CSRRWI => self.exec_csrrxi(insn, pos, CsrOp::Write, "csrrwi"),
            FUNCT3_CSRRSI => self.exec_csrrxi(insn, pos, CsrOp::Set, "csrrsi"),
            FUNCT3_CSRRCI => self.exec_csrrxi(insn, pos, CsrOp::Clear, "csrrci"),
            _ => self.exec_illegal_insn(insn, pos),
        }
    }

    fn exec_illegal_insn(&mut self, _insn: u32, pos: Option<&mut String>) {
        if let Some(out) = pos {
            out.push_str(&decode::render_illegal_insn());
        }
        self.halt = true;
        self.halt_reason = String::from("Illegal instruction");
    }

    /// lui: rd = imm_u; pc += 4
    fn exec_lui(&mut self, insn: u32, pos: Option<&mut String>) {
        let rd = decode::get_rd(insn);
        let val = decode::get_imm_u(insn);
        if let Some(out) = pos {
            push_rendered(out, &decode::render_lui(insn));
            let _ = write!(
                out,
                "// {} = {}",
                decode::render_reg(rd),
                hex::to_hex0x32(val as u32)
            );
        }
        self.regs.set(rd, val);
        self.pc = self.pc.wrapping_add(4);
    }

    /// auipc: rd = pc + imm_u; pc += 4
    fn exec_auipc(&mut self, insn: u32, pos: Option<&mut String>) {
        let rd = decode::get_rd(insn);
        let imm = decode::get_imm_u(insn);
        let old_pc = self.pc;
        let val = old_pc.wrapping_add(imm as u32);
        if let Some(out) = pos {
            push_rendered(out, &decode::render_auipc(insn));
            let _ = write!(
                out,
                "// {} = {} + {} = {}",
                decode::render_reg(rd),
                hex::to_hex0x32(old_pc),
                hex::to_hex0x32(imm as u32),
                hex::to_hex0x32(val)
            );
        }
        self.regs.set(rd, val as i32);
        self.pc = self.pc.wrapping_add(4);
    }

    /// jal: rd = pc + 4; pc = pc + imm_j
    fn exec_jal(&mut self, insn: u32, pos: Option<&mut String>) {
        let rd = decode::get_rd(insn);
        let imm = decode::get_imm_j(insn);
        let pc_before = self.pc;
        let target = pc_before.wrapping_add(imm as u32);
        let retaddr = pc_before.wrapping_add(4);
        if let Some(out) = pos {
            push_rendered(out, &decode::render_jal(pc_before, insn));
            let _ = write!(
                out,
                "// {} = {},  pc = {}",
                decode::render_reg(rd),
                hex::to_hex0x32(retaddr),
                hex::to_hex0x32(target)
            );
        }
        self.regs.set(rd, retaddr as i32);
        self.pc = target;
    }

    /// jalr: rd = pc + 4; pc = (rs1 + imm_i) & ~1
    fn exec_jalr(&mut self, insn: u32, pos: Option<&mut String>) {
        let rd = decode::get_rd(insn);
        let rs1 = decode::get_rs1(insn);
        let imm = decode::get_imm_i(insn);
        let pc_before = self.pc;
        let rs1_val = self.regs.get(rs1) as u32;
        let target = rs1_val.wrapping_add(imm as u32) & !1;
        let retaddr = pc_before.wrapping_add(4);
        if let Some(out) = pos {
            push_rendered(out, &decode::render_jalr(insn));
            let _ = write!(
                out,
                "// {} = {},  pc = {}",
                decode::render_reg(rd),
                hex::to_hex0x32(retaddr),
                hex::to_hex0x32(target)
            );
        }
        self.regs.set(rd, retaddr as i32);
        self.pc = target;
    }

    /// beq, bne, blt, bge, bltu, bgeu
    fn exec_branch(&mut self, insn: u32, pos: Option<&mut String>) {
        let rs1 = decode::get_rs1(insn);
        let rs2 = decode::get_rs2(insn);
        let rs1_val = self.regs.get(rs1);
        let rs2_val = self.regs.get(rs2);
        let pc_before = self.pc;
        let imm = decode::get_imm_b(insn);
        let target = pc_before.wrapping_add(imm as u32);

        let (mnemonic, take) = match decode::get_funct3(insn) {
            FUNCT3_BEQ => ("beq", rs1_val == rs2_val),
            FUNCT3_BNE => ("bne", rs1_val != rs2_val),
            FUNCT3_BLT => ("blt", rs1_val < rs2_val),
            FUNCT3_BGE => ("bge", rs1_val >= rs2_val),
            FUNCT3_BLTU => ("bltu", (rs1_val as u32) < (rs2_val as u32)),
            FUNCT3_BGEU => ("bgeu", (rs1_val as u32) >= (rs2_val as u32)),
            _ => return self.exec_illegal_insn(insn, pos),
        };

        if let Some(out) = pos {
            push_rendered(out, &decode::render_btype(pc_before, insn, mnemonic));
            let _ = write!(
                out,
                "// {} = {}, {} = {}, ",
                decode::render_reg(rs1),
                hex::to_hex0x32(rs1_val as u32),
                decode::render_reg(rs2),
                hex::to_hex0x32(rs2_val as u32)
            );
            if take {
                let _ = write!(out, "br_taken  pc = {}", hex::to_hex0x32(target));
            } else {
                let _ = write!(
                    out,
                    "br_not_taken  pc = {}",
                    hex::to_hex0x32(pc_before.wrapping_add(4))
                );
            }
        }

        self.pc = if take {
            target
        } else {
            pc_before.wrapping_add(4)
        };
    }

    /// lb, lh, lw, lbu, lhu
    fn exec_load(&mut self, insn: u32, pos: Option<&mut String>) {
        let rd = decode::get_rd(insn);
        let rs1 = decode::get_rs1(insn);
        let imm = decode::get_imm_i(insn);
        let addr = (self.regs.get(rs1) as u32).wrapping_add(imm as u32);

        let (mnemonic, loaded) = match decode::get_funct3(insn) {
            FUNCT3_B => ("lb", self.mem.get8_sx(addr)),
            FUNCT3_H => ("lh", self.mem.get16_sx(addr)),
            FUNCT3_W => ("lw", self.mem.get32_sx(addr)),
            FUNCT3_BU => ("lbu", i32::from(self.mem.get8(addr))),
            FUNCT3_HU => ("lhu", i32::from(self.mem.get16(addr))),
            _ => return self.exec_illegal_insn(insn, pos),
        };

        if let Some(out) = pos {
            push_rendered(out, &decode::render_itype_load(insn, mnemonic));
            let _ = write!(
                out,
                "// {} = mem[{}] = {}",
                decode::render_reg(rd),
                hex::to_hex0x32(addr),
                hex::to_hex0x32(loaded as u32)
            );
        }

        self.regs.set(rd, loaded);
        self.pc = self.pc.wrapping_add(4);
    }

    /// sb, sh, sw
    fn exec_store(&mut self, insn: u32, pos: Option<&mut String>) {
        let rs1 = decode::get_rs1(insn);
        let rs2 = decode::get_rs2(insn);
        let imm = decode::get_imm_s(insn);
        let addr = (self.regs.get(rs1) as u32).wrapping_add(imm as u32);
        let rs2_val = self.regs.get(rs2) as u32;

        let mnemonic = match decode::get_funct3(insn) {
            FUNCT3_B => {
                self.mem.set8(addr, rs2_val as u8);
                "sb"
            }
            FUNCT3_H => {
                self.mem.set16(addr, rs2_val as u16);
                "sh"
            }
            FUNCT3_W => {
                self.mem.set32(addr, rs2_val);
                "sw"
            }
            _ => return self.exec_illegal_insn(insn, pos),
        };

        if let Some(out) = pos {
            push_rendered(out, &decode::render_stype(insn, mnemonic));
            let _ = write!(
                out,
                "// mem[{}] = {}",
                hex::to_hex0x32(addr),
                hex::to_hex0x32(rs2_val)
            );
        }

        self.pc = self.pc.wrapping_add(4);
    }

    /// addi, slti, sltiu, xori, ori, andi, slli, srli, srai
    fn exec_alu_imm(&mut self, insn: u32, pos: Option<&mut String>) {
        let rd = decode::get_rd(insn);
        let rs1 = decode::get_rs1(insn);
        let funct7 = decode::get_funct7(insn);
        let imm = decode::get_imm_i(insn);
        let rs1_val = self.regs.get(rs1);
        let mut shown_imm = imm;

        let (mnemonic, result) = match decode::get_funct3(insn) {
            FUNCT3_ADDI => ("addi", rs1_val.wrapping_add(imm)),
            FUNCT3_SLTI => ("slti", (rs1_val < imm) as i32),
            // The comparison is unsigned, but against the sign-extended
            // immediate reinterpreted as unsigned
            FUNCT3_SLTIU => ("sltiu", ((rs1_val as u32) < (imm as u32)) as i32),
            FUNCT3_XORI => ("xori", rs1_val ^ imm),
            FUNCT3_ORI => ("ori", rs1_val | imm),
            FUNCT3_ANDI => ("andi", rs1_val & imm),
            FUNCT3_SLLI => {
                if funct7 != FUNCT7_BASE {
                    return self.exec_illegal_insn(insn, pos);
                }
                shown_imm = imm & 0x1f;
                ("slli", ((rs1_val as u32) << shown_imm) as i32)
            }
            FUNCT3_SRLI => {
                shown_imm = imm & 0x1f;
                match funct7 {
                    FUNCT7_BASE => ("srli", ((rs1_val as u32) >> shown_imm) as i32),
                    FUNCT7_SRA => ("srai", rs1_val >> shown_imm),
                    _ => return self.exec_illegal_insn(insn, pos),
                }
            }
            _ => return self.exec_illegal_insn(insn, pos),
        };

        if let Some(out) = pos {
            push_rendered(out, &decode::render_itype_alu(insn, mnemonic, shown_imm));
            let _ = write!(
                out,
                "// {} = {}",
                decode::render_reg(rd),
                hex::to_hex0x32(result as u32)
            );
        }

        self.regs.set(rd, result);
        self.pc = self.pc.wrapping_add(4);
    }

    /// add, sub, sll, slt, sltu, xor, srl, sra, or, and
    fn exec_alu_reg(&mut self, insn: u32, pos: Option<&mut String>) {
        let rd = decode::get_rd(insn);
        let rs1 = decode::get_rs1(insn);
        let rs2 = decode::get_rs2(insn);
        let funct7 = decode::get_funct7(insn);
        let rs1_val = self.regs.get(rs1);
        let rs2_val = self.regs.get(rs2);
        // Shift amount is the low five bits of rs2
        let shamt = rs2_val & 0x1f;

        let (mnemonic, result) = match decode::get_funct3(insn) {
            FUNCT3_ADD => match funct7 {
                FUNCT7_BASE => ("add", rs1_val.wrapping_add(rs2_val)),
                FUNCT7_SUB => ("sub", rs1_val.wrapping_sub(rs2_val)),
                _ => return self.exec_illegal_insn(insn, pos),
            },
            FUNCT3_SLL => {
                if funct7 != FUNCT7_BASE {
                    return self.exec_illegal_insn(insn, pos);
                }
                ("sll", ((rs1_val as u32) << shamt) as i32)
            }
            FUNCT3_SLT => {
                if funct7 != FUNCT7_BASE {
                    return self.exec_illegal_insn(insn, pos);
                }
                ("slt", (rs1_val < rs2_val) as i32)
            }
            FUNCT3_SLTU => {
                if funct7 != FUNCT7_BASE {
                    return self.exec_illegal_insn(insn, pos);
                }
                ("sltu", ((rs1_val as u32) < (rs2_val as u32)) as i32)
            }
            FUNCT3_XOR => {
                if funct7 != FUNCT7_BASE {
                    return self.exec_illegal_insn(insn, pos);
                }
                ("xor", rs1_val ^ rs2_val)
            }
            FUNCT3_SRL => match funct7 {
                FUNCT7_BASE => ("srl", ((rs1_val as u32) >> shamt) as i32),
                FUNCT7_SRA => ("sra", rs1_val >> shamt),
                _ => return self.exec_illegal_insn(insn, pos),
            },
            FUNCT3_OR => {
                if funct7 != FUNCT7_BASE {
                    return self.exec_illegal_insn(insn, pos);
                }
                ("or", rs1_val | rs2_val)
            }
            FUNCT3_AND => {
                if funct7 != FUNCT7_BASE {
                    return self.exec_illegal_insn(insn, pos);
                }
                ("and", rs1_val & rs2_val)
            }
            _ => return self.exec_illegal_insn(insn, pos),
        };

        if let Some(out) = pos {
            push_rendered(out, &decode::render_rtype(insn, mnemonic));
            let _ = write!(
                out,
                "// {} = {}",
                decode::render_reg(rd),
                hex::to_hex0x32(result as u32)
            );
        }

        self.regs.set(rd, result);
        self.pc = self.pc.wrapping_add(4);
    }

    fn exec_ecall(&mut self, pos: Option<&mut String>) {
        if let Some(out) = pos {
            push_rendered(out, "ecall");
            out.push_str("// HALT");
        }
        self.halt = true;
        self.halt_reason = String::from("ECALL instruction");
    }

    fn exec_ebreak(&mut self, pos: Option<&mut String>) {
        if let Some(out) = pos {
            push_rendered(out, "ebreak");
            out.push_str("// HALT");
        }
        self.halt = true;
        self.halt_reason = String::from("EBREAK instruction");
    }

    /// csrrw, csrrs, csrrc. The set/clear forms leave the CSR
    /// unchanged when the rs1 index (not value) is x0.
    fn exec_csrrx(&mut self, insn: u32, pos: Option<&mut String>, op: CsrOp, mnemonic: &str) {
        let rd = decode::get_rd(insn);
        let rs1 = decode::get_rs1(insn);
        let csr_addr = decode::get_csr(insn);
        if csr_addr >= CSR_COUNT as u32 {
            return self.exec_illegal_insn(insn, pos);
        }

        let old_val = self.csrs[csr_addr as usize];
        let rs1_val = self.regs.get(rs1) as u32;
        let new_val = match op {
            CsrOp::Write => rs1_val,
            CsrOp::Set if rs1 != 0 => old_val | rs1_val,
            CsrOp::Clear if rs1 != 0 => old_val & !rs1_val,
            _ => old_val,
        };
        self.csrs[csr_addr as usize] = new_val;

        if let Some(out) = pos {
            push_rendered(out, &decode::render_csrrx(insn, mnemonic));
            let _ = write!(
                out,
                "// csr[{}] was {}, now {}",
                hex::to_hex0x12(csr_addr),
                hex::to_hex0x32(old_val),
                hex::to_hex0x32(new_val)
            );
            if rd != 0 {
                let _ = write!(
                    out,
                    "; {} = {}",
                    decode::render_reg(rd),
                    hex::to_hex0x32(old_val)
                );
            }
        }

        if rd != 0 {
            self.regs.set(rd, old_val as i32);
        }
        self.pc = self.pc.wrapping_add(4);
    }

    /// csrrwi, csrrsi, csrrci. The operand is the 5-bit zero-extended
    /// immediate in the rs1 field; set/clear leave the CSR unchanged
    /// when it is zero.
    fn exec_csrrxi(&mut self, insn: u32, pos: Option<&mut String>, op: CsrOp, mnemonic: &str) {
        let rd = decode::get_rd(insn);
        let zimm = decode::get_rs1(insn);
        let csr_addr = decode::get_csr(insn);
        if csr_addr >= CSR_COUNT as u32 {
            return self.exec_illegal_insn(insn, pos);
        }

        let old_val = self.csrs[csr_addr as usize];
        let new_val = match op {
            CsrOp::Write => zimm,
            CsrOp::Set if zimm != 0 => old_val | zimm,
            CsrOp::Clear if zimm != 0 => old_val & !zimm,
            _ => old_val,
        };
        self.csrs[csr_addr as usize] = new_val;

        if let Some(out) = pos {
            push_rendered(out, &decode::render_csrrxi(insn, mnemonic));
            let _ = write!(
                out,
                "// csr[{}] was {}, now {}",
                hex::to_hex0x12(csr_addr),
                hex::to_hex0x32(old_val),
                hex::to_hex0x32(new_val)
            );
            if rd != 0 {
                let _ = write!(
                    out,
                    "; {} = {}",
                    decode::render_reg(rd),
                    hex::to_hex0x32(old_val)
                );
            }
        }

        if rd != 0 {
            self.regs.set(rd, old_val as i32);
        }
        self.pc = self.pc.wrapping_add(4);
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::encode;

    fn hart_with_program<'a>(mem: &'a mut Memory, program: &[u32]) -> Hart<'a> {
        for (i, insn) in program.iter().enumerate() {
            mem.set32(4 * i as u32, *insn);
        }
        let mut hart = Hart::new(mem);
        hart.reset();
        hart
    }

    #[test]
    fn check_lui() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0x0000_10b7]); // lui x1, 1
        hart.tick("");
        assert_eq!(hart.regs.get(1), 0x1000);
        assert_eq!(hart.pc, 4);
        assert_eq!(hart.insn_counter, 1);
        assert!(!hart.halt);
    }

    #[test]
    fn check_addi_minus_one() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0xfff0_0093]); // addi x1, x0, -1
        hart.tick("");
        assert_eq!(hart.regs.get(1) as u32, 0xffff_ffff);
        assert_eq!(hart.pc, 4);
    }

    #[test]
    fn check_auipc() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0, encode::auipc(4, 53)]);
        hart.pc = 4;
        hart.tick("");
        assert_eq!(hart.regs.get(4), 4 + (53 << 12));
        assert_eq!(hart.pc, 8);
    }

    #[test]
    fn check_jal_to_self() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0x0000_006f]); // jal x0, 0
        hart.tick("");
        assert_eq!(hart.pc, 0);
        assert_eq!(hart.regs.get(0), 0);
        assert_eq!(hart.insn_counter, 1);
        assert!(!hart.halt);
        for _ in 1..1000 {
            hart.tick("");
        }
        assert_eq!(hart.insn_counter, 1000);
        assert_eq!(hart.pc, 0);
    }

    #[test]
    fn check_jal_links_return_address() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0, 0, encode::jal(4, -8)]);
        hart.pc = 8;
        hart.tick("");
        assert_eq!(hart.regs.get(4), 12);
        assert_eq!(hart.pc, 0);
    }

    #[test]
    fn check_jalr_clears_low_bit_only() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::addi(1, 0, 3), encode::jalr(5, 1, 0)],
        );
        hart.tick("");
        hart.tick("");
        // Target 3 has only bit 0 cleared, leaving a misaligned pc
        assert_eq!(hart.pc, 2);
        assert_eq!(hart.regs.get(5), 8);
        assert!(!hart.halt);
    }

    #[test]
    fn check_misaligned_pc_halts_without_counting() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::addi(1, 0, 3), encode::jalr(0, 1, 0)],
        );
        hart.tick("");
        hart.tick("");
        assert_eq!(hart.insn_counter, 2);
        hart.tick("");
        assert!(hart.halt);
        assert_eq!(hart.halt_reason, "PC alignment error");
        assert_eq!(hart.insn_counter, 2);
    }

    #[test]
    fn check_ebreak_halts() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0x0010_0073]);
        hart.tick("");
        assert!(hart.halt);
        assert_eq!(hart.halt_reason, "EBREAK instruction");
        assert_eq!(hart.insn_counter, 1);
    }

    #[test]
    fn check_ecall_halts() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0x0000_0073]);
        hart.tick("");
        assert!(hart.halt);
        assert_eq!(hart.halt_reason, "ECALL instruction");
    }

    #[test]
    fn check_tick_is_noop_when_halted() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0x0010_0073]);
        hart.tick("");
        hart.tick("");
        hart.tick("");
        assert_eq!(hart.insn_counter, 1);
        assert_eq!(hart.halt_reason, "EBREAK instruction");
    }

    #[test]
    fn check_illegal_instruction_halts() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0x0000_0000]);
        hart.tick("");
        assert!(hart.halt);
        assert_eq!(hart.halt_reason, "Illegal instruction");
        assert_eq!(hart.insn_counter, 1);
    }

    #[test]
    fn check_store_load_round_trip() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::sw(6, 0, 0x40), encode::lw(5, 0, 0x40)],
        );
        hart.regs.set(6, 0xdead_beef_u32 as i32);
        hart.tick("");
        hart.tick("");
        assert_eq!(hart.regs.get(5) as u32, 0xdead_beef);
        assert_eq!(hart.mem.get8(0x40), 0xef);
        assert_eq!(hart.mem.get8(0x41), 0xbe);
        assert_eq!(hart.mem.get8(0x42), 0xad);
        assert_eq!(hart.mem.get8(0x43), 0xde);
        assert_eq!(hart.pc, 8);
    }

    #[test]
    fn check_lb_sign_extends() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::lb(1, 0, 0x20), encode::lbu(3, 0, 0x20)],
        );
        hart.mem.set8(0x20, 0xff);
        hart.tick("");
        hart.tick("");
        assert_eq!(hart.regs.get(1), -1);
        assert_eq!(hart.regs.get(3), 0xff);
    }

    #[test]
    fn check_lh_sign_extends() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::lh(1, 0, 0x20), encode::lhu(3, 0, 0x20)],
        );
        hart.mem.set16(0x20, 0xff92);
        hart.tick("");
        hart.tick("");
        assert_eq!(hart.regs.get(1) as u32, 0xffff_ff92);
        assert_eq!(hart.regs.get(3), 0xff92);
    }

    #[test]
    fn check_sb_stores_low_byte_only() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::sb(6, 0, 0x20)]);
        hart.regs.set(6, 0x1234_56fe);
        hart.tick("");
        assert_eq!(hart.mem.get8(0x20), 0xfe);
        // The fill pattern next door is untouched
        assert_eq!(hart.mem.get8(0x21), 0xa5);
    }

    #[test]
    fn check_branch_taken_and_not_taken() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::beq(1, 2, 16)]);
        hart.regs.set(1, 7);
        hart.regs.set(2, 7);
        hart.tick("");
        assert_eq!(hart.pc, 16);

        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::beq(1, 2, 16)]);
        hart.regs.set(1, 7);
        hart.regs.set(2, 8);
        hart.tick("");
        assert_eq!(hart.pc, 4);
    }

    #[test]
    fn check_branch_signed_vs_unsigned() {
        // -1 < 10 signed, but 0xffffffff > 10 unsigned
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::blt(1, 2, 16)]);
        hart.regs.set(1, -1);
        hart.regs.set(2, 10);
        hart.tick("");
        assert_eq!(hart.pc, 16);

        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::bltu(1, 2, 16)]);
        hart.regs.set(1, -1);
        hart.regs.set(2, 10);
        hart.tick("");
        assert_eq!(hart.pc, 4);
    }

    #[test]
    fn check_branch_backwards() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0, 0, encode::bge(1, 2, -8)]);
        hart.pc = 8;
        hart.regs.set(1, 5);
        hart.regs.set(2, 5);
        hart.tick("");
        assert_eq!(hart.pc, 0);
    }

    #[test]
    fn check_sltiu_uses_sign_extended_immediate_as_unsigned() {
        // sltiu x1, x2, -1 compares against 0xffffffff
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::sltiu(1, 2, -1)]);
        hart.regs.set(2, 100);
        hart.tick("");
        assert_eq!(hart.regs.get(1), 1);
    }

    #[test]
    fn check_immediate_shifts_use_low_five_bits() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[
                encode::slli(1, 2, 2),
                encode::srli(3, 2, 4),
                encode::srai(4, 5, 4),
            ],
        );
        hart.regs.set(2, 0b1101);
        hart.regs.set(5, 0xf000_0f00_u32 as i32);
        hart.tick("");
        assert_eq!(hart.regs.get(1), 0b110100);
        hart.regs.set(2, 0xf000_0f00_u32 as i32);
        hart.tick("");
        assert_eq!(hart.regs.get(3) as u32, 0x0f00_00f0);
        hart.tick("");
        assert_eq!(hart.regs.get(4) as u32, 0xff00_00f0);
    }

    #[test]
    fn check_register_shifts_mask_rs2() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::sll(1, 2, 3)]);
        hart.regs.set(2, 1);
        // Only the low five bits of rs2 count: 0x21 & 0x1f == 1
        hart.regs.set(3, 0x21);
        hart.tick("");
        assert_eq!(hart.regs.get(1), 2);
    }

    #[test]
    fn check_add_sub_wrap() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::add(1, 2, 3), encode::sub(4, 5, 6)],
        );
        hart.regs.set(2, 0xffff_fffe_u32 as i32);
        hart.regs.set(3, 5);
        hart.regs.set(5, 20);
        hart.regs.set(6, 22);
        hart.tick("");
        hart.tick("");
        assert_eq!(hart.regs.get(1), 3);
        assert_eq!(hart.regs.get(4), -2);
    }

    #[test]
    fn check_slt_sltu() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::slt(1, 2, 3), encode::sltu(4, 2, 3)],
        );
        hart.regs.set(2, -1);
        hart.regs.set(3, 1);
        hart.tick("");
        hart.tick("");
        assert_eq!(hart.regs.get(1), 1);
        assert_eq!(hart.regs.get(4), 0);
    }

    #[test]
    fn check_alu_reg_bad_funct7_is_illegal() {
        let mut mem = Memory::new(0x100);
        let bad = encode::and(1, 2, 3) | (FUNCT7_SUB << 25);
        let mut hart = hart_with_program(&mut mem, &[bad]);
        hart.tick("");
        assert!(hart.halt);
        assert_eq!(hart.halt_reason, "Illegal instruction");
    }

    #[test]
    fn check_x0_stays_zero() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::addi(0, 0, 5), encode::lui(0, 0x12345)],
        );
        hart.tick("");
        assert_eq!(hart.regs.get(0), 0);
        hart.tick("");
        assert_eq!(hart.regs.get(0), 0);
    }

    #[test]
    fn check_csrrw_round_trip() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::csrrw(0, 0x300, 2), encode::csrrs(3, 0x300, 0)],
        );
        hart.regs.set(2, 0x55);
        hart.tick("");
        assert_eq!(hart.csrs[0x300], 0x55);
        // csrrs with rs1 == x0 reads without modifying
        hart.tick("");
        assert_eq!(hart.regs.get(3), 0x55);
        assert_eq!(hart.csrs[0x300], 0x55);
    }

    #[test]
    fn check_csrrs_and_csrrc_set_and_clear_bits() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::csrrs(1, 0x340, 2), encode::csrrc(3, 0x340, 4)],
        );
        hart.csrs[0x340] = 0xf0;
        hart.regs.set(2, 0x0f);
        hart.regs.set(4, 0x30);
        hart.tick("");
        assert_eq!(hart.csrs[0x340], 0xff);
        assert_eq!(hart.regs.get(1), 0xf0);
        hart.tick("");
        assert_eq!(hart.csrs[0x340], 0xcf);
        assert_eq!(hart.regs.get(3), 0xff);
    }

    #[test]
    fn check_csr_immediate_forms() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[
                encode::csrrwi(1, 0x305, 21),
                encode::csrrsi(0, 0x305, 2),
                encode::csrrci(0, 0x305, 1),
            ],
        );
        hart.tick("");
        assert_eq!(hart.csrs[0x305], 21);
        assert_eq!(hart.regs.get(1), 0);
        hart.tick("");
        assert_eq!(hart.csrs[0x305], 23);
        hart.tick("");
        assert_eq!(hart.csrs[0x305], 22);
    }

    #[test]
    fn check_csrrw_rd_zero_suppresses_read() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::csrrw(0, 0x300, 2)]);
        hart.regs.set(2, 7);
        hart.tick("");
        assert_eq!(hart.csrs[0x300], 7);
        assert_eq!(hart.regs.get(0), 0);
        assert_eq!(hart.pc, 4);
    }

    #[test]
    fn check_reset_clears_halt_and_csrs_but_not_memory() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[encode::csrrwi(0, 0x300, 5), 0x0010_0073]);
        hart.tick("");
        hart.tick("");
        assert!(hart.halt);
        assert_eq!(hart.csrs[0x300], 5);
        hart.reset();
        assert!(!hart.halt);
        assert_eq!(hart.halt_reason, "none");
        assert_eq!(hart.pc, 0);
        assert_eq!(hart.insn_counter, 0);
        assert_eq!(hart.csrs[0x300], 0);
        // The program image survives the reset
        assert_eq!(hart.mem.get32(0), encode::csrrwi(0, 0x300, 5));
    }

    #[test]
    fn check_run_with_limit_does_not_halt() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(&mut mem, &[0x0000_006f]); // jal x0, 0
        hart.run(5);
        assert_eq!(hart.insn_counter, 5);
        assert!(!hart.halt);
        // x2 is seeded with the memory size
        assert_eq!(hart.regs.get(2), 0x100);
    }

    #[test]
    fn check_run_until_halt() {
        let mut mem = Memory::new(0x100);
        let mut hart = hart_with_program(
            &mut mem,
            &[encode::addi(1, 0, 1), encode::addi(1, 1, 1), 0x0000_0073],
        );
        hart.run(0);
        assert!(hart.halt);
        assert_eq!(hart.halt_reason, "ECALL instruction");
        assert_eq!(hart.insn_counter, 3);
        assert_eq!(hart.regs.get(1), 2);
    }

    #[test]
    fn check_pc_advances_by_four_for_non_jumps() {
        let mut mem = Memory::new(0x100);
        let program = [
            encode::addi(1, 0, 1),
            encode::xori(3, 1, 0xff),
            encode::ori(4, 1, 0xf0),
            encode::andi(5, 1, 0x0f),
            encode::sw(1, 0, 0x40),
            encode::lw(6, 0, 0x40),
        ];
        let mut hart = hart_with_program(&mut mem, &program);
        for (i, _) in program.iter().enumerate() {
            hart.tick("");
            assert_eq!(hart.pc, 4 * (i as u32 + 1));
        }
    }

    #[test]
    fn check_trace_comment_for_lui() {
        let mut mem = Memory::new(0x100);
        let mut hart = Hart::new(&mut mem);
        hart.reset();
        let mut line = String::new();
        hart.exec(encode::lui(1, 1), Some(&mut line));
        assert_eq!(
            line,
            format!("{:<35}// x1 = 0x00001000", "lui     x1,0x00001")
        );
    }

    #[test]
    fn check_trace_comment_for_auipc() {
        let mut mem = Memory::new(0x100);
        let mut hart = Hart::new(&mut mem);
        hart.reset();
        hart.pc = 4;
        let mut line = String::new();
        hart.exec(encode::auipc(4, 0xabcde), Some(&mut line));
        assert_eq!(
            line,
            format!(
                "{:<35}// x4 = 0x00000004 + 0xabcde000 = 0xabcde004",
                "auipc   x4,0xabcde"
            )
        );
    }

    #[test]
    fn check_trace_comment_for_jal() {
        let mut mem = Memory::new(0x100);
        let mut hart = Hart::new(&mut mem);
        hart.reset();
        let mut line = String::new();
        hart.exec(encode::jal(1, 8), Some(&mut line));
        assert_eq!(
            line,
            format!(
                "{:<35}// x1 = 0x00000004,  pc = 0x00000008",
                "jal     x1,0x00000008"
            )
        );
    }

    #[test]
    fn check_trace_comment_for_branch() {
        let mut mem = Memory::new(0x100);
        let mut hart = Hart::new(&mut mem);
        hart.reset();
        hart.regs.set(1, 7);
        hart.regs.set(2, 7);
        let mut line = String::new();
        hart.exec(encode::beq(1, 2, 16), Some(&mut line));
        assert_eq!(
            line,
            format!(
                "{:<35}// x1 = 0x00000007, x2 = 0x00000007, br_taken  pc = 0x00000010",
                "beq     x1,x2,0x00000010"
            )
        );

        hart.reset();
        hart.pc = 0;
        hart.regs.set(1, 7);
        hart.regs.set(2, 8);
        let mut line = String::new();
        hart.exec(encode::beq(1, 2, 16), Some(&mut line));
        assert_eq!(
            line,
            format!(
                "{:<35}// x1 = 0x00000007, x2 = 0x00000008, br_not_taken  pc = 0x00000004",
                "beq     x1,x2,0x00000010"
            )
        );
    }

    #[test]
    fn check_trace_comment_for_load_and_store() {
        let mut mem = Memory::new(0x100);
        mem.set32(0x40, 0xdead_beef);
        let mut hart = Hart::new(&mut mem);
        hart.reset();
        let mut line = String::new();
        hart.exec(encode::lw(5, 0, 0x40), Some(&mut line));
        assert_eq!(
            line,
            format!(
                "{:<35}// x5 = mem[0x00000040] = 0xdeadbeef",
                "lw      x5,64(x0)"
            )
        );

        hart.regs.set(6, 0x1234);
        let mut line = String::new();
        hart.exec(encode::sw(6, 0, 0x50), Some(&mut line));
        assert_eq!(
            line,
            format!("{:<35}// mem[0x00000050] = 0x00001234", "sw      x6,80(x0)")
        );
    }

    #[test]
    fn check_trace_comment_for_csr() {
        let mut mem = Memory::new(0x100);
        let mut hart = Hart::new(&mut mem);
        hart.reset();
        hart.regs.set(2, 5);
        let mut line = String::new();
        hart.exec(encode::csrrw(1, 0x300, 2), Some(&mut line));
        assert_eq!(
            line,
            format!(
                "{:<35}// csr[0x300] was 0x00000000, now 0x00000005; x1 = 0x00000000",
                "csrrw   x1,0x300,x2"
            )
        );
    }

    #[test]
    fn check_trace_comment_for_ebreak() {
        let mut mem = Memory::new(0x100);
        let mut hart = Hart::new(&mut mem);
        hart.reset();
        let mut line = String::new();
        hart.exec(encode::ebreak(), Some(&mut line));
        assert_eq!(line, format!("{:<35}// HALT", "ebreak"));
    }

    #[test]
    fn check_tracing_does_not_change_state() {
        let run = |trace: bool| -> (u32, i32, u64) {
            let mut mem = Memory::new(0x100);
            let program = [
                encode::addi(1, 0, 10),
                encode::slli(1, 1, 4),
                encode::sw(1, 0, 0x40),
                encode::lw(3, 0, 0x40),
                encode::ebreak(),
            ];
            let mut hart = hart_with_program(&mut mem, &program);
            hart.set_show_instructions(trace);
            hart.run(0);
            (hart.pc, hart.regs.get(3), hart.insn_counter)
        };
        assert_eq!(run(false), run(true));
    }
}
