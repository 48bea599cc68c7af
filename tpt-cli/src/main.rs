//! `tpt`: one executable with a subcommand per program in spec.md §6.3,
//! wired up the way `submerge`'s top-level binary owns process concerns
//! (argument parsing, subscriber setup, exit codes) while every format and
//! algorithm lives in the library crates this binary only calls into.
//!
//! Several of spec.md's named programs correspond to one *conceptual*
//! pass of a pipeline that `tpt-tppt`/`tpt-tplm` implement as a single
//! in-memory `build()` call (see those crates' module docs). Rather than
//! fabricate separate on-disk intermediate formats these crates have no
//! use for, each pass-shaped subcommand here re-runs the same `build()`
//! and writes only the slice of [`tpt_tppt::BuildArtifacts`] /
//! [`tpt_tplm::BuildArtifacts`] that pass owns; `*-assemble` writes
//! everything a reader needs, since it is always the last pass run. This
//! is spelled out in each subcommand's `--help` text and in DESIGN.md.

mod alignment;
mod arpalm;
mod textpt;
mod vocab;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tpt_base::Result;

#[derive(Parser)]
#[command(name = "tpt", version, about = "Tightly packed phrase-table, language-model, suffix-array and alignment tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// textpt_encode_phrases: assign frequency-sorted token ids per side,
    /// build both sequence repositories, emit the per-row `.col` files.
    TextptEncodePhrases {
        /// Pipe-delimited text phrase table (`src ||| trg ||| scores ...`).
        text_pt: PathBuf,
        /// Output base name; files are written as `<base>.{src,trg}.*`.
        base: PathBuf,
        /// The text phrase table carries a 4th `a=...` alignment field.
        #[arg(long)]
        alignment: bool,
        /// The text phrase table carries a trailing `c=...` counts field.
        #[arg(long)]
        counts: bool,
    },
    /// textpt_encode_scores: quantize score/count/alignment columns into
    /// per-column codebooks and the target-phrase-reference table.
    TextptEncodeScores {
        text_pt: PathBuf,
        base: PathBuf,
        #[arg(long)]
        alignment: bool,
        #[arg(long)]
        counts: bool,
        /// Bit-block schema search width (spec.md §4.3's `max_blocks`).
        #[arg(long, default_value_t = tpt_codec_default_max_blocks())]
        max_blocks: u32,
    },
    /// textpt_assemble: build the tightly packed source-phrase trie and
    /// write every file a [`tpt_tppt::PhraseTable`] needs to open.
    TextptAssemble {
        text_pt: PathBuf,
        base: PathBuf,
        #[arg(long)]
        alignment: bool,
        #[arg(long)]
        counts: bool,
        #[arg(long, default_value_t = tpt_codec_default_max_blocks())]
        max_blocks: u32,
    },
    /// tppt_dump: print every row of an assembled TPPT to stdout as
    /// `src ||| trg ||| scores [||| a=...] [||| c=...]`.
    TpptDump { base: PathBuf },

    /// arpalm_encode: parse an ARPA LM and write its token index,
    /// probability/back-off codebooks, and unigram table.
    ArpalmEncode {
        arpa: PathBuf,
        base: PathBuf,
        /// Token to treat as the unknown-word placeholder; must appear in
        /// the ARPA model's 1-gram section.
        #[arg(long, default_value = "<unk>")]
        unk: String,
        #[arg(long, default_value_t = tpt_codec_default_max_blocks())]
        max_blocks: u32,
    },
    /// arpalm_sng_av: per-shard sort-and-value-merge of one back-off
    /// shard. This implementation's `ArpalmEncode`/`ArpalmAssemble` never
    /// spill per-order shard files to disk in the first place (the whole
    /// pipeline runs as one in-memory pass), so there is no shard for
    /// this subcommand to operate on; it exists to keep the spec's
    /// program list runnable end to end and reports that fact.
    ArpalmSngAv {
        /// Accepted for interface compatibility with spec.md §6.3; not
        /// read.
        bo_shard: PathBuf,
    },
    /// arpalm_assemble: build the tightly packed reverse-context trie and
    /// write every file a [`tpt_tplm::LanguageModel`] needs to open.
    ArpalmAssemble {
        arpa: PathBuf,
        base: PathBuf,
        #[arg(long, default_value = "<unk>")]
        unk: String,
        #[arg(long, default_value_t = tpt_codec_default_max_blocks())]
        max_blocks: u32,
    },

    /// vocab_build: read whitespace-tokenized text on stdin, write a
    /// frequency-sorted token index.
    VocabBuild {
        out: PathBuf,
        /// Token to mark as the unknown-word placeholder, if any; it is
        /// inserted even if absent from the input.
        #[arg(long)]
        unk: Option<String>,
    },
    /// mmctrack_build: read whitespace-tokenized text on stdin, write a
    /// packed corpus track against an existing token index.
    MmctrackBuild { tdx: PathBuf, out: PathBuf },
    /// mmsufa_build: build a suffix (or prefix) array over a corpus track.
    MmsufaBuild {
        mct: PathBuf,
        out: PathBuf,
        /// `ltr` for an ordinary suffix array, `rtl` for a prefix array
        /// (spec.md §9's "trait with two comparison orderings").
        #[arg(long, default_value = "ltr")]
        order: String,
        /// Upper bound on token ids grouped by the array's top-level
        /// index; defaults to `1 + max token id observed in the corpus`.
        #[arg(long)]
        vocab_size: Option<u32>,
    },

    /// tp_alignment_build: pack per-sentence word-alignment sets into a
    /// `.tpa` file. Input is one line per sentence, `N ||| i-j i-j ...`
    /// where `N` is the source-sentence length (so empty trailing sets
    /// are representable) and each `i-j` links source position `i` to
    /// target position `j`. The original green-format text grammar is
    /// explicitly out of scope (spec.md §1); this is `tpt-cli`'s own
    /// plain-text encoding of the same `(sets-per-sentence)` shape.
    TpAlignmentBuild { green: PathBuf, out: PathBuf },
    /// tp_alignment_dump: print a `.tpa` file's per-sentence alignment
    /// sets back out in the format [`Command::TpAlignmentBuild`] reads.
    TpAlignmentDump {
        tpa: PathBuf,
        /// First line to dump, 0-based.
        #[arg(long)]
        from: Option<u32>,
        /// One past the last line to dump.
        #[arg(long)]
        to: Option<u32>,
    },
}

fn tpt_codec_default_max_blocks() -> u32 {
    tpt_codec::DEFAULT_MAX_BLOCKS
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("tpt: error: {e:?}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::TextptEncodePhrases { text_pt, base, alignment, counts } => {
            textpt::encode_phrases(&text_pt, &base, alignment, counts)
        }
        Command::TextptEncodeScores { text_pt, base, alignment, counts, max_blocks } => {
            textpt::encode_scores(&text_pt, &base, alignment, counts, max_blocks)
        }
        Command::TextptAssemble { text_pt, base, alignment, counts, max_blocks } => {
            textpt::assemble(&text_pt, &base, alignment, counts, max_blocks)
        }
        Command::TpptDump { base } => textpt::dump(&base),

        Command::ArpalmEncode { arpa, base, unk, max_blocks } => arpalm::encode(&arpa, &base, &unk, max_blocks),
        Command::ArpalmSngAv { bo_shard } => arpalm::sng_av(&bo_shard),
        Command::ArpalmAssemble { arpa, base, unk, max_blocks } => arpalm::assemble(&arpa, &base, &unk, max_blocks),

        Command::VocabBuild { out, unk } => vocab::vocab_build(&out, unk.as_deref()),
        Command::MmctrackBuild { tdx, out } => vocab::mmctrack_build(&tdx, &out),
        Command::MmsufaBuild { mct, out, order, vocab_size } => vocab::mmsufa_build(&mct, &out, &order, vocab_size),

        Command::TpAlignmentBuild { green, out } => alignment::build(&green, &out),
        Command::TpAlignmentDump { tpa, from, to } => alignment::dump(&tpa, from, to),
    }
}
