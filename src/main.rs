//! TISC-64 Emulator - CLI Entry Point
//!
//! Commands:
//! - `tisc64-emu run <image>` - Run a binary program image
//! - `tisc64-emu asm <source>` - Assemble source to an image
//! - `tisc64-emu disasm <image>` - Disassemble an image

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;

use tisc64::asm::{assemble, disassemble, disassemble_instruction, encode_image, load_image, save_image};
use tisc64::bus::{Bus, Device, MemoryLayout, WriterDevice};
use tisc64::cpu::{Cpu, CpuState, Registers};

#[derive(Parser)]
#[command(name = "tisc64-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator for the TISC-64, a tiny 64-bit register machine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program image until it halts
    Run {
        /// Path to the binary image to execute
        image: String,
        /// Memory layout file (JSON); defaults to the firmware map
        #[arg(short, long)]
        layout: Option<String>,
        /// Maximum number of cycles to run
        #[arg(short, long, default_value = "1000000")]
        max_cycles: u64,
        /// Show one line per executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the final register state as JSON
        #[arg(long)]
        dump_state: bool,
        /// File the mapped output device writes into; discarded if absent
        #[arg(long)]
        device_out: Option<String>,
    },
    /// Assemble source to a binary image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a binary image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            image,
            layout,
            max_cycles,
            trace,
            dump_state,
            device_out,
        } => {
            run_program(&image, layout.as_deref(), max_cycles, trace, dump_state, device_out.as_deref());
        }
        Commands::Asm { source, output } => {
            assemble_file(&source, output);
        }
        Commands::Disasm { image } => {
            disassemble_file(&image);
        }
    }
}

fn load_layout(path: Option<&str>) -> MemoryLayout {
    let Some(path) = path else {
        return MemoryLayout::default();
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("❌ Failed to read layout: {}", e);
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(layout) => layout,
        Err(e) => {
            eprintln!("❌ Invalid layout: {}", e);
            std::process::exit(1);
        }
    }
}

/// One device handle per declared window: the first gets the output sink,
/// any further windows get discarding writers.
fn make_devices(layout: &MemoryLayout, device_out: Option<&str>) -> Vec<Box<dyn Device>> {
    let mut devices: Vec<Box<dyn Device>> = Vec::new();
    for index in 0..layout.devices.len() {
        if index == 0 {
            if let Some(path) = device_out {
                match std::fs::File::create(path) {
                    Ok(file) => {
                        devices.push(Box::new(WriterDevice::new(file)));
                        continue;
                    }
                    Err(e) => {
                        eprintln!("❌ Failed to create device output: {}", e);
                        std::process::exit(1);
                    }
                }
            }
        }
        devices.push(Box::new(WriterDevice::new(std::io::sink())));
    }
    devices
}

#[derive(Serialize)]
struct StateDump<'a> {
    state: CpuState,
    cycles: u64,
    registers: &'a Registers,
}

fn run_program(
    path: &str,
    layout_path: Option<&str>,
    max_cycles: u64,
    trace: bool,
    dump_state: bool,
    device_out: Option<&str>,
) {
    let layout = load_layout(layout_path);
    let devices = make_devices(&layout, device_out);

    let bus = match Bus::new(layout, devices) {
        Ok(bus) => bus,
        Err(e) => {
            eprintln!("❌ Bad memory layout: {}", e);
            std::process::exit(1);
        }
    };

    let program = match load_image(path) {
        Ok(program) => {
            println!("📂 Loaded {} instructions", program.len());
            program
        }
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    let mut cpu = Cpu::new(bus);
    cpu.load_program(&encode_image(&program));

    while cpu.is_running() && cpu.cycles < max_cycles {
        match cpu.step() {
            Ok(Some(instr)) => {
                if trace {
                    println!("{:06}  {}", cpu.cycles - 1, disassemble_instruction(&instr));
                }
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("❌ Machine fault: {}", e);
                std::process::exit(1);
            }
        }
        // Devices advance once per cycle; an interrupt they raise is
        // observed at the start of the next cycle.
        cpu.bus.tick_devices();
    }

    match cpu.state {
        CpuState::Halted => println!("✅ Halted cleanly after {} cycles", cpu.cycles),
        CpuState::Interrupted(code) => {
            println!("⚡ Stopped on interrupt {} after {} cycles", code, cpu.cycles);
        }
        CpuState::Running => println!("⏱️  Cycle limit ({}) reached", max_cycles),
    }

    if dump_state {
        let dump = StateDump {
            state: cpu.state,
            cycles: cpu.cycles,
            registers: &cpu.regs,
        };
        match serde_json::to_string_pretty(&dump) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("❌ Failed to serialize state: {}", e),
        }
    }
}

fn assemble_file(source_path: &str, output: Option<String>) {
    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let program = match assemble(&source) {
        Ok(program) => {
            println!("📝 Assembled {} instructions", program.len());
            program
        }
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    let output = output.unwrap_or_else(|| {
        let stem = source_path.rsplit_once('.').map_or(source_path, |(stem, _)| stem);
        format!("{}.bin", stem)
    });

    if let Err(e) = save_image(&output, &program) {
        eprintln!("❌ Failed to write image: {}", e);
        std::process::exit(1);
    }
    println!("💾 Wrote {}", output);
}

fn disassemble_file(path: &str) {
    let program = match load_image(path) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    let mut stdout = std::io::stdout();
    if let Err(e) = stdout.write_all(disassemble(&program).as_bytes()) {
        eprintln!("❌ Failed to write output: {}", e);
        std::process::exit(1);
    }
}
