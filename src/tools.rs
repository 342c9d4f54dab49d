//! Adapters for external command-line tools and their scratch space.

use crate::error::{HaystackError, Result};
use crate::genome::SequenceProvider;
use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of a finished tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was ended by a signal
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external programs on behalf of the pipeline.
pub trait ToolRunner: Sync {
    fn run(&self, tool: &str, args: &[String], stdin: Option<&[u8]>) -> Result<ToolOutput>;

    /// Like [`ToolRunner::run`], but a non-zero exit becomes
    /// `HaystackError::ExternalTool`
    fn run_checked(&self, tool: &str, args: &[String], stdin: Option<&[u8]>) -> Result<ToolOutput> {
        let output = self.run(tool, args, stdin)?;
        if output.success() {
            Ok(output)
        } else {
            Err(HaystackError::ExternalTool {
                command: command_line(tool, args),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

fn command_line(tool: &str, args: &[String]) -> String {
    std::iter::once(tool)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs tools as child processes, optionally killing them after a timeout.
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {
    timeout: Option<Duration>,
}

impl SubprocessRunner {
    pub fn new() -> Self {
        SubprocessRunner::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        SubprocessRunner {
            timeout: Some(timeout),
        }
    }

    fn wait(&self, child: &mut Child, command: &str) -> Result<Option<i32>> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.code());
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    child.kill()?;
                    child.wait()?;
                    return Err(HaystackError::ToolTimeout {
                        command: command.to_string(),
                        seconds: timeout.as_secs(),
                    });
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut buffer)?;
        }
        Ok(buffer)
    })
}

fn join_output(handle: thread::JoinHandle<std::io::Result<String>>) -> Result<String> {
    handle
        .join()
        .map_err(|_| HaystackError::ResourceExhaustion("output reader thread panicked".into()))?
        .map_err(HaystackError::from)
}

impl ToolRunner for SubprocessRunner {
    fn run(&self, tool: &str, args: &[String], stdin: Option<&[u8]>) -> Result<ToolOutput> {
        let command = command_line(tool, args);
        debug!("Running `{}`", command);

        let mut child = Command::new(tool)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HaystackError::ExternalTool {
                command: command.clone(),
                code: None,
                stderr: e.to_string(),
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_vec();
                // a tool that exits early closes its stdin; that is not an error here
                Some(thread::spawn(move || {
                    let _ = pipe.write_all(&input);
                }))
            }
            _ => None,
        };

        let exit_code = self.wait(&mut child, &command)?;
        if let Some(writer) = writer {
            let _ = writer.join();
        }

        Ok(ToolOutput {
            stdout: join_output(stdout)?,
            stderr: join_output(stderr)?,
            exit_code,
        })
    }
}

/// A private temporary directory, removed when dropped.
///
/// Directory names carry a random suffix, so concurrent runs never share
/// files.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    /// Creates the directory under the system temp directory, or under
    /// `parent` when given
    pub fn new(prefix: &str, parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        debug!("Scratch space at {}", dir.path().display());
        Ok(ScratchSpace { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a file named `name` inside the scratch directory
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Writes a `chrom<TAB>length` table, the chromosome sizes file the UCSC
/// tools expect
pub fn write_chrom_sizes<G: SequenceProvider + ?Sized>(genome: &G, filename: impl AsRef<Path>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(filename)?);
    for chrom in genome.chromosomes() {
        if let Some(len) = genome.chromosome_length(&chrom) {
            writeln!(writer, "{}\t{}", chrom, len)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Converts a bedgraph into a bigWig track with `bedGraphToBigWig`.
///
/// The chromosome sizes file is written to a scratch directory that is
/// removed afterwards, whether or not the conversion succeeds.
pub fn bedgraph_to_bigwig<G: SequenceProvider + ?Sized>(
    runner: &dyn ToolRunner,
    genome: &G,
    bedgraph: &Path,
    output: &Path,
) -> Result<()> {
    let scratch = ScratchSpace::new("haystack_bigwig_", None)?;
    let chrom_sizes = scratch.file("chrom_sizes.txt");
    write_chrom_sizes(genome, &chrom_sizes)?;

    let args = vec![
        bedgraph.display().to_string(),
        chrom_sizes.display().to_string(),
        output.display().to_string(),
    ];
    runner.run_checked("bedGraphToBigWig", &args, None)?;
    info!("Wrote {}", output.display());
    Ok(())
}
