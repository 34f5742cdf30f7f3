//! Decode a WAV file against a model directory, streaming it chunk by chunk
//! the way a live audio source would.

use anyhow::{Context, Result, bail};
use clap::Parser;
use lattix::StreamingDecoder;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lattix-decode", version, about = "Streaming lattice decoder")]
struct Args {
    /// Model directory containing lattix.toml and the model bundle
    model_dir: PathBuf,

    /// WAV file to decode (16-bit PCM)
    wav: PathBuf,

    /// Speaker key from the model's speaker registry
    #[arg(long)]
    speaker: Option<String>,

    /// Audio chunk size in milliseconds, to mimic live intake
    #[arg(long, default_value_t = 100)]
    chunk_ms: u32,

    /// Stop at the first detected endpoint instead of decoding everything
    #[arg(long)]
    until_endpoint: bool,

    /// Print per-word alignment with confidences
    #[arg(long)]
    align: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut decoder = StreamingDecoder::new(&args.model_dir)
        .with_context(|| format!("opening model directory {}", args.model_dir.display()))?;

    if args.speaker.is_some() {
        decoder
            .set_speaker(args.speaker.as_deref())
            .context("selecting speaker")?;
        decoder.reset().context("rebuilding session for speaker")?;
    }

    let samples = read_wav(&args, decoder.config().sample_rate())?;
    let chunk =
        (decoder.config().sample_rate() as usize * args.chunk_ms as usize / 1000).max(1);

    let mut endpointed = false;
    for piece in samples.chunks(chunk) {
        decoder.accept_waveform(piece)?;
        decoder.advance(usize::MAX)?;
        if args.until_endpoint && decoder.detect_endpoint() {
            endpointed = true;
            break;
        }
    }
    if !endpointed {
        decoder.input_finished();
        decoder.advance(usize::MAX)?;
    }
    decoder.finalize();

    let shift = decoder.frame_shift_secs();
    log::info!(
        "decoded {} frames ({:.2}s), endpoint: {}",
        decoder.frames_decoded(),
        decoder.frames_decoded() as f32 * shift,
        endpointed
    );

    match decoder.best_path() {
        Some(path) => {
            let transcript: Vec<&str> =
                path.words.iter().map(|&w| decoder.word_text(w)).collect();
            println!("{}", transcript.join(" "));
        }
        None => bail!("no frames decoded; is the file long enough for one frame?"),
    }

    if args.align {
        for word in decoder.word_alignment_with_confidence()? {
            let start = word.start_frame as f32 * shift;
            let end = (word.start_frame + word.num_frames) as f32 * shift;
            let text = if word.word == 0 {
                "<sil>"
            } else {
                decoder.word_text(word.word)
            };
            match word.confidence {
                Some(c) => println!("{start:8.2} {end:8.2}  {text}  ({c:.3})"),
                None => println!("{start:8.2} {end:8.2}  {text}"),
            }
        }
    }

    Ok(())
}

/// Read a 16-bit PCM WAV, downmixing to mono.
fn read_wav(args: &Args, expected_rate: u32) -> Result<Vec<i16>> {
    let reader = hound::WavReader::open(&args.wav)
        .with_context(|| format!("opening {}", args.wav.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != expected_rate {
        bail!(
            "WAV sample rate {} does not match the model's {}",
            spec.sample_rate,
            expected_rate
        );
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!("only 16-bit integer PCM WAV files are supported");
    }

    let channels = spec.channels as usize;
    let interleaved: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<_, _>>()
        .context("reading WAV samples")?;
    if channels == 1 {
        return Ok(interleaved);
    }
    Ok(interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect())
}
