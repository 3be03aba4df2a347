use clap::Parser;
use rv32sim::decode;
use rv32sim::hart::Hart;
use rv32sim::hex;
use rv32sim::memory::Memory;
use std::process;

/// Simulate a 32-bit RISC-V processor running a raw binary image
#[derive(Parser, Debug)]
#[command(disable_help_flag = true)]
struct Args {
    /// Show disassembly before program execution
    #[arg(short = 'd')]
    disassemble: bool,

    /// Show instruction printing during execution
    #[arg(short = 'i')]
    show_instructions: bool,

    /// Maximum number of instructions to exec (0 means no limit)
    #[arg(short = 'l', default_value_t = 0)]
    exec_limit: u64,

    /// Memory size in bytes, given in hex
    #[arg(short = 'm', value_parser = parse_hex_size, default_value = "100")]
    memory_limit: u32,

    /// Show register printing during execution
    #[arg(short = 'r')]
    show_registers: bool,

    /// Show a dump of the regs & memory after simulation
    #[arg(short = 'z')]
    dump_after: bool,

    /// Input binary image file
    infile: String,
}

/// The memory size option is hexadecimal with or without a 0x prefix
fn parse_hex_size(arg: &str) -> Result<u32, String> {
    let digits = arg.strip_prefix("0x").unwrap_or(arg);
    u32::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

fn usage() -> ! {
    eprintln!("Usage: rv32sim [-d] [-i] [-r] [-z] [-l exec-limit] [-m hex-mem-size] infile");
    eprintln!("  -d show disassembly before program execution");
    eprintln!("  -i show instruction printing during execution");
    eprintln!("  -l maximum number of instructions to exec");
    eprintln!("  -m specify memory size (default = 0x100)");
    eprintln!("  -r show register printing during execution");
    eprintln!("  -z show a dump of the regs & memory after simulation");
    process::exit(1);
}

/// Disassemble every 4-byte word in memory
fn disassemble(mem: &Memory) {
    for addr in (0..mem.size()).step_by(4) {
        let insn = mem.get32(addr);
        println!(
            "{}: {}  {}",
            hex::to_hex32(addr),
            hex::to_hex32(insn),
            decode::decode(addr, insn)
        );
    }
}

fn main() {
    let args = Args::try_parse().unwrap_or_else(|_| usage());

    let mut mem = Memory::new(args.memory_limit);
    if let Err(e) = mem.load_file(&args.infile) {
        eprintln!("{e}");
        process::exit(1);
    }

    if args.disassemble {
        disassemble(&mem);
    }

    let mut hart = Hart::new(&mut mem);
    hart.reset();
    hart.set_show_instructions(args.show_instructions);
    hart.set_show_registers(args.show_registers);
    hart.run(args.exec_limit);

    if args.dump_after {
        hart.dump("");
        mem.dump();
    }
}
