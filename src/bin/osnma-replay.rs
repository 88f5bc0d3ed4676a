//! Replays a text log of OSNMA data through the authentication engine.
//!
//! The log is read from stdin, one item per line. Fields are separated by
//! whitespace, GSTs are given as `WN TOW` and byte fields in hexadecimal.
//! Empty lines and lines starting with `#` are skipped.
//!
//! ```text
//! inav SVN WN TOW E1B|E5B WORD
//! record SVN WN TOW ced|timing DATA
//! hkroot SVN WN TOW NMA_HEADER DSM_HEADER BLOCK
//! mack SVN WN TOW NMA_HEADER hmac|cmac KEY|- [PRND:ADKD:CTR:TAG ...]
//! advance WN TOW
//! abandon
//! ```
//!
//! Tags are given in hexadecimal, with as many bits as hex digits times 4.

use anyhow::{Context, Result};
use clap::Parser;
use osnma_core::{
    bitfields::{Adkd, DsmHeader, NmaHeader},
    crypto::MacFunction,
    helper::hex_decode,
    keystore::KeyStore,
    merkle_tree::MerkleTree,
    navmessage::{DataElement, NavigationDataRecord},
    pubkey::decode_public_key,
    tags::{Resolution, TagState},
    types::{BitVec, DsmBlock, InavBand, InavWord},
    AuthFrame, Config, Error, Gst, Osnma, Svn, TagEntry,
};
use std::io::BufRead;
use std::str::SplitWhitespace;

/// Replay an OSNMA log read from stdin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the public key in PEM format.
    #[arg(long)]
    pubkey: Option<String>,
    /// Public key in hexadecimal (compressed SEC1 point or SPKI DER).
    #[arg(long)]
    pubkey_hex: Option<String>,
    /// ID of the public key.
    #[arg(long)]
    pkid: Option<u8>,
    /// Merkle tree root in hex.
    #[arg(long)]
    merkle_root: Option<String>,
    /// Write the public key in use at the end of the log to this PEM file.
    #[arg(long)]
    store_pubkey: Option<String>,
    /// Disclosure deadline in subframes.
    #[arg(long)]
    deadline: Option<i32>,
    /// Use the reduced memory profile (no Slow MAC).
    #[arg(long)]
    small: bool,
}

fn keystore(args: &Args) -> Result<KeyStore> {
    if args.pubkey.is_some() && args.pubkey_hex.is_some() {
        anyhow::bail!("the --pubkey and --pubkey-hex arguments are mutually exclusive");
    }
    let mut keystore = if let Some(path) = &args.pubkey {
        KeyStore::load_public_key(path, None)
            .with_context(|| format!("could not load public key from {path}"))?
    } else if let Some(hex) = &args.pubkey_hex {
        let pubkey = decode_public_key(&hex_decode(hex)?).context("invalid public key")?;
        KeyStore::from_public_key(pubkey, None)
    } else {
        KeyStore::new()
    };
    if let Some(pkid) = args.pkid {
        let pubkey = keystore
            .public_key()
            .cloned()
            .context("the --pkid argument needs a public key")?;
        keystore.set_public_key_material(pubkey, Some(pkid));
    }
    Ok(keystore)
}

fn next<'a>(fields: &mut SplitWhitespace<'a>, name: &str) -> Result<&'a str> {
    fields.next().with_context(|| format!("missing field {name}"))
}

fn parse_svn(fields: &mut SplitWhitespace) -> Result<Svn> {
    let svn: u8 = next(fields, "SVN")?.parse().context("invalid SVN")?;
    Ok(Svn::try_from(svn)?)
}

fn parse_gst(fields: &mut SplitWhitespace) -> Result<Gst> {
    let wn = next(fields, "WN")?.parse().context("invalid WN")?;
    let tow = next(fields, "TOW")?.parse().context("invalid TOW")?;
    Ok(Gst::new(wn, tow))
}

fn parse_bytes<const N: usize>(fields: &mut SplitWhitespace, name: &str) -> Result<[u8; N]> {
    let bytes = hex_decode(next(fields, name)?)?;
    bytes
        .as_slice()
        .try_into()
        .with_context(|| format!("{name} has {} bytes, expected {N}", bytes.len()))
}

fn parse_bits(hex: &str) -> Result<BitVec> {
    let nbits = 4 * hex.len();
    let mut padded = hex.to_string();
    if hex.len() % 2 == 1 {
        padded.push('0');
    }
    let mut bits = BitVec::from_vec(hex_decode(&padded)?);
    bits.truncate(nbits);
    Ok(bits)
}

fn parse_tag(field: &str) -> Result<TagEntry> {
    let parts: Vec<&str> = field.split(':').collect();
    let [prnd, adkd, ctr, tag] = parts[..] else {
        anyhow::bail!("malformed tag {field}");
    };
    let prnd: u8 = prnd.parse().context("invalid PRND")?;
    let adkd: u8 = adkd.parse().context("invalid ADKD")?;
    Ok(TagEntry {
        prnd: Svn::try_from(prnd)?,
        adkd: Adkd::try_from(adkd)?,
        ctr: ctr.parse().context("invalid CTR")?,
        tag: parse_bits(tag)?,
    })
}

fn process_line(osnma: &mut Osnma, line: &str) -> Result<Vec<Resolution>> {
    let mut fields = line.split_whitespace();
    let Some(kind) = fields.next() else {
        return Ok(Vec::new());
    };
    match kind {
        "inav" => {
            let svn = parse_svn(&mut fields)?;
            let gst = parse_gst(&mut fields)?;
            let band = match next(&mut fields, "band")? {
                "E1B" => InavBand::E1B,
                "E5B" => InavBand::E5B,
                band => anyhow::bail!("unknown band {band}"),
            };
            let word: InavWord = parse_bytes(&mut fields, "INAV word")?;
            osnma.feed_inav(&word, svn, gst, band);
            Ok(Vec::new())
        }
        "record" => {
            let svn = parse_svn(&mut fields)?;
            let gst = parse_gst(&mut fields)?;
            let data_element = match next(&mut fields, "data element")? {
                "ced" => DataElement::CedAndStatus,
                "timing" => DataElement::TimingParameters,
                element => anyhow::bail!("unknown data element {element}"),
            };
            let mut data = BitVec::from_vec(hex_decode(next(&mut fields, "data")?)?);
            data.truncate(data_element.bits());
            osnma.feed_record(NavigationDataRecord::new(svn, gst, data_element, &data)?);
            Ok(Vec::new())
        }
        "hkroot" => {
            let svn = parse_svn(&mut fields)?;
            let gst = parse_gst(&mut fields)?;
            let [nma_header] = parse_bytes::<1>(&mut fields, "NMA header")?;
            let [dsm_header] = parse_bytes::<1>(&mut fields, "DSM header")?;
            let block: DsmBlock = parse_bytes(&mut fields, "DSM block")?;
            log::trace!("DSM block from {svn}");
            let (nma_header, dsm_header) = (NmaHeader(nma_header), DsmHeader(dsm_header));
            match osnma.feed_dsm_block(nma_header, dsm_header, &block, gst) {
                Ok(resolutions) => Ok(resolutions),
                Err(e) => {
                    log::error!("could not process DSM at {gst:?}: {e}");
                    Ok(Vec::new())
                }
            }
        }
        "mack" => {
            let svn = parse_svn(&mut fields)?;
            let gst = parse_gst(&mut fields)?;
            let [nma_header] = parse_bytes::<1>(&mut fields, "NMA header")?;
            let mac_function = match next(&mut fields, "MAC function")? {
                "hmac" => MacFunction::HmacSha256,
                "cmac" => MacFunction::CmacAes,
                mac => anyhow::bail!("unknown MAC function {mac}"),
            };
            let key = match next(&mut fields, "key")? {
                "-" => None,
                key => Some(hex_decode(key)?),
            };
            let tags = fields.map(parse_tag).collect::<Result<Vec<_>>>()?;
            let frame = AuthFrame {
                svn,
                gst,
                nma_status: NmaHeader(nma_header).nma_status(),
                chain_id: NmaHeader(nma_header).chain_id(),
                key,
                mac_function,
                tags,
            };
            match osnma.feed_auth_frame(&frame) {
                Ok(resolutions) => Ok(resolutions),
                Err(e) => {
                    log::error!("could not process MACK from {svn} at {gst:?}: {e}");
                    Ok(Vec::new())
                }
            }
        }
        "advance" => Ok(osnma.advance(parse_gst(&mut fields)?)),
        "abandon" => Ok(osnma.abandon_epoch()),
        _ => anyhow::bail!("unknown line type {kind}"),
    }
}

fn report(resolution: &Resolution) {
    let id = &resolution.id;
    match resolution.state {
        TagState::Pending => log::debug!("tag {id:?} pending"),
        TagState::Authenticated => log::info!(
            "{:?} of {} at {:?} authenticated by tag {id:?}",
            resolution.record.data_element,
            resolution.record.svn,
            resolution.record.gst
        ),
        TagState::Failed(reason) => log::warn!("tag {id:?} failed: {}", Error::from(reason)),
        TagState::Unverifiable(reason) => log::warn!("tag {id:?} unverifiable: {reason:?}"),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = if args.small {
        Config::small()
    } else {
        Config::default()
    };
    if let Some(deadline) = args.deadline {
        config.disclosure_deadline_subframes = deadline;
    }

    let mut osnma = Osnma::with_keystore(config, keystore(&args)?);
    if let Some(root) = &args.merkle_root {
        let root = MerkleTree::from_slice(&hex_decode(root)?).context("invalid Merkle root")?;
        osnma.set_merkle_tree(root);
    }
    if !osnma.keystore().have_public_key() && args.merkle_root.is_none() {
        log::warn!("no public key or Merkle tree root given. no root key can be authenticated");
    }

    let stdin = std::io::stdin();
    for (lineno, line) in stdin.lock().lines().enumerate() {
        let line = line.context("could not read stdin")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let resolutions = process_line(&mut osnma, line)
            .with_context(|| format!("line {}: {line}", lineno + 1))?;
        for resolution in &resolutions {
            report(resolution);
        }
    }

    for svn in Svn::iter() {
        if let Some(data) = osnma.get_ced_and_status(svn) {
            log::info!(
                "{svn} CED and status authenticated (authbits = {}, GST = {:?})",
                data.authbits(),
                data.gst()
            );
        }
        if let Some(data) = osnma.get_timing_parameters(svn) {
            log::info!(
                "{svn} timing parameters authenticated (authbits = {}, GST = {:?})",
                data.authbits(),
                data.gst()
            );
        }
    }

    if let Some(path) = &args.store_pubkey {
        osnma
            .keystore()
            .store_public_key(path)
            .with_context(|| format!("could not store public key to {path}"))?;
        log::info!("stored {} public key to {path}", osnma.keystore().get_public_key_type());
    }

    Ok(())
}
