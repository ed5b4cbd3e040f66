//! APK Signing Block wire format
//!
//! The block sits between the last zip entry and the central directory:
//! a length-prefixed list of `(id, value)` pairs, closed by a repeated
//! length and a 16-byte magic. Scheme v2 and v3 values share the signer
//! record shape; v3 adds the SDK range both inside and outside the
//! signed data.

use crate::identity::SigningIdentity;
use apkforge_errors::{Result, SigningError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rsa::Pkcs1v15Sign;
use sha2::{Digest as _, Sha256};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub(crate) const SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
pub(crate) const SCHEME_V2_ID: u32 = 0x7109_871a;
pub(crate) const SCHEME_V3_ID: u32 = 0xf053_68c0;
pub(crate) const RSA_PKCS1V15_SHA2_256: u32 = 0x0103;

const MAX_CHUNK_SIZE: usize = 1024 * 1024;
/// Scheme v3 ships on releases that know the v3 block; older ones fall
/// back to the v2 pair.
const V3_MIN_SDK: u32 = 28;
const V3_MAX_SDK: u32 = 0x7fff_ffff;

fn signing_err(message: impl Into<String>) -> apkforge_errors::Error {
    SigningError::Signing {
        message: message.into(),
    }
    .into()
}

/// Offsets of the three zip regions the signing scheme cares about.
/// `sb_start == cd_start` when the package carries no signing block yet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ZipSections {
    pub sb_start: u64,
    pub cd_start: u64,
    pub cde_start: u64,
}

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_SIZE: u64 = 22;

fn find_cde_start<R: Read + Seek>(r: &mut R) -> Result<u64> {
    let file_length = r.seek(SeekFrom::End(0))?;
    if file_length < EOCD_SIZE {
        return Err(signing_err("input too short for a zip"));
    }
    let search_lower_bound = file_length.saturating_sub(EOCD_SIZE + u64::from(u16::MAX));
    let mut pos = file_length - EOCD_SIZE;
    loop {
        r.seek(SeekFrom::Start(pos))?;
        if r.read_u32::<LittleEndian>()? == EOCD_SIGNATURE {
            return Ok(pos);
        }
        if pos == search_lower_bound || pos == 0 {
            return Err(signing_err("central directory end not found"));
        }
        pos -= 1;
    }
}

/// Locate the central directory and any existing signing block.
pub(crate) fn parse_sections<R: Read + Seek>(r: &mut R) -> Result<ZipSections> {
    let cde_start = find_cde_start(r)?;
    r.seek(SeekFrom::Start(cde_start + 16))?;
    let cd_start = u64::from(r.read_u32::<LittleEndian>()?);

    let mut sections = ZipSections {
        sb_start: cd_start,
        cd_start,
        cde_start,
    };
    if cd_start < 24 {
        return Ok(sections);
    }

    r.seek(SeekFrom::Start(cd_start - 16 - 8))?;
    let block_size = r.read_u64::<LittleEndian>()?;
    let mut magic = [0u8; 16];
    r.read_exact(&mut magic)?;
    if &magic == SIGNING_BLOCK_MAGIC && block_size + 8 <= cd_start {
        // Existing block is replaced, not extended.
        sections.sb_start = cd_start - block_size - 8;
    }
    Ok(sections)
}

/// Digest of the zip as the signature schemes define it: 1 MiB chunks of
/// the entry data and central directory, the directory end record with
/// its central-directory offset patched to the block start, then a root
/// digest over the chunk digests.
pub(crate) fn compute_digest<R: Read + Seek>(
    r: &mut R,
    sections: &ZipSections,
) -> Result<[u8; 32]> {
    let mut chunks: Vec<[u8; 32]> = Vec::new();
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; MAX_CHUNK_SIZE];

    r.rewind()?;
    let mut pos = 0;
    while pos < sections.sb_start {
        hash_chunk(&mut chunks, r, sections.sb_start, &mut hasher, &mut buffer, &mut pos)?;
    }

    let mut pos = r.seek(SeekFrom::Start(sections.cd_start))?;
    while pos < sections.cde_start {
        hash_chunk(&mut chunks, r, sections.cde_start, &mut hasher, &mut buffer, &mut pos)?;
    }

    buffer.clear();
    r.seek(SeekFrom::Start(sections.cde_start))?;
    r.read_to_end(&mut buffer)?;
    if buffer.len() >= 20 {
        let offset = u32::try_from(sections.sb_start)
            .map_err(|_| signing_err("package exceeds 4 GiB"))?;
        buffer[16..20].copy_from_slice(&offset.to_le_bytes());
    }
    if buffer.len() > MAX_CHUNK_SIZE {
        return Err(signing_err("directory end record too large"));
    }
    hasher.update([0xa5]);
    hasher.update(u32::try_from(buffer.len()).unwrap_or(u32::MAX).to_le_bytes());
    hasher.update(&buffer);
    chunks.push(hasher.finalize_reset().into());

    hasher.update([0x5a]);
    hasher.update(
        u32::try_from(chunks.len())
            .map_err(|_| signing_err("too many digest chunks"))?
            .to_le_bytes(),
    );
    for chunk in &chunks {
        hasher.update(chunk);
    }
    Ok(hasher.finalize().into())
}

fn hash_chunk<R: Read + Seek>(
    chunks: &mut Vec<[u8; 32]>,
    r: &mut R,
    end: u64,
    hasher: &mut Sha256,
    buffer: &mut Vec<u8>,
    pos: &mut u64,
) -> Result<()> {
    let chunk_end = std::cmp::min(*pos + MAX_CHUNK_SIZE as u64, end);
    let len = usize::try_from(chunk_end - *pos).map_err(|_| signing_err("chunk overflow"))?;
    buffer.resize(len, 0);
    r.read_exact(buffer)?;
    hasher.update([0xa5]);
    #[allow(clippy::cast_possible_truncation)]
    hasher.update((len as u32).to_le_bytes());
    hasher.update(&*buffer);
    chunks.push(hasher.finalize_reset().into());
    *pos = chunk_end;
    Ok(())
}

fn sign_bytes(identity: &SigningIdentity, bytes: &[u8]) -> Result<Vec<u8>> {
    let digest = Sha256::digest(bytes);
    identity
        .private_key()
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| signing_err(format!("signature: {e}")))
}

fn write_lv(w: &mut impl Write, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| signing_err("record too large"))?;
    w.write_u32::<LittleEndian>(len)?;
    w.write_all(bytes)?;
    Ok(())
}

fn write_digests(w: &mut impl Write, digest: &[u8; 32]) -> Result<()> {
    // One record: record length, algorithm, digest length, digest.
    let record_len: u32 = 8 + 32;
    w.write_u32::<LittleEndian>(record_len + 4)?;
    w.write_u32::<LittleEndian>(record_len)?;
    w.write_u32::<LittleEndian>(RSA_PKCS1V15_SHA2_256)?;
    w.write_u32::<LittleEndian>(32)?;
    w.write_all(digest)?;
    Ok(())
}

fn write_certificates(w: &mut impl Write, cert_der: &[u8]) -> Result<()> {
    let total = u32::try_from(cert_der.len() + 4).map_err(|_| signing_err("cert too large"))?;
    w.write_u32::<LittleEndian>(total)?;
    write_lv(w, cert_der)?;
    Ok(())
}

fn write_signatures(w: &mut impl Write, signature: &[u8]) -> Result<()> {
    let record_len = 8 + u32::try_from(signature.len())
        .map_err(|_| signing_err("signature too large"))?;
    w.write_u32::<LittleEndian>(record_len + 4)?;
    w.write_u32::<LittleEndian>(record_len)?;
    w.write_u32::<LittleEndian>(RSA_PKCS1V15_SHA2_256)?;
    #[allow(clippy::cast_possible_truncation)]
    w.write_u32::<LittleEndian>(signature.len() as u32)?;
    w.write_all(signature)?;
    Ok(())
}

fn scheme_v2_value(identity: &SigningIdentity, digest: &[u8; 32]) -> Result<Vec<u8>> {
    let mut signed_data = Vec::new();
    write_digests(&mut signed_data, digest)?;
    write_certificates(&mut signed_data, identity.certificate_der())?;
    signed_data.write_u32::<LittleEndian>(0)?; // additional attributes

    let signature = sign_bytes(identity, &signed_data)?;

    let mut signer = Vec::new();
    write_lv(&mut signer, &signed_data)?;
    write_signatures(&mut signer, &signature)?;
    write_lv(&mut signer, &identity.public_key_der()?)?;

    let mut value = Vec::new();
    let mut signers = Vec::new();
    write_lv(&mut signers, &signer)?;
    write_lv(&mut value, &signers)?;
    Ok(value)
}

fn scheme_v3_value(identity: &SigningIdentity, digest: &[u8; 32]) -> Result<Vec<u8>> {
    let mut signed_data = Vec::new();
    write_digests(&mut signed_data, digest)?;
    write_certificates(&mut signed_data, identity.certificate_der())?;
    signed_data.write_u32::<LittleEndian>(V3_MIN_SDK)?;
    signed_data.write_u32::<LittleEndian>(V3_MAX_SDK)?;
    signed_data.write_u32::<LittleEndian>(0)?; // additional attributes

    let signature = sign_bytes(identity, &signed_data)?;

    let mut signer = Vec::new();
    write_lv(&mut signer, &signed_data)?;
    signer.write_u32::<LittleEndian>(V3_MIN_SDK)?;
    signer.write_u32::<LittleEndian>(V3_MAX_SDK)?;
    write_signatures(&mut signer, &signature)?;
    write_lv(&mut signer, &identity.public_key_der()?)?;

    let mut value = Vec::new();
    let mut signers = Vec::new();
    write_lv(&mut signers, &signer)?;
    write_lv(&mut value, &signers)?;
    Ok(value)
}

/// Serialize the complete signing block (v2 + v3 pairs).
pub(crate) fn write_signing_block(
    w: &mut impl Write,
    identity: &SigningIdentity,
    digest: &[u8; 32],
) -> Result<()> {
    let v2 = scheme_v2_value(identity, digest)?;
    let v3 = scheme_v3_value(identity, digest)?;

    let pairs_len = (8 + 4 + v2.len()) + (8 + 4 + v3.len());
    let block_size = (pairs_len + 8 + 16) as u64; // excludes the leading size field

    w.write_u64::<LittleEndian>(block_size)?;
    w.write_u64::<LittleEndian>(v2.len() as u64 + 4)?;
    w.write_u32::<LittleEndian>(SCHEME_V2_ID)?;
    w.write_all(&v2)?;
    w.write_u64::<LittleEndian>(v3.len() as u64 + 4)?;
    w.write_u32::<LittleEndian>(SCHEME_V3_ID)?;
    w.write_all(&v3)?;
    w.write_u64::<LittleEndian>(block_size)?;
    w.write_all(SIGNING_BLOCK_MAGIC)?;
    Ok(())
}
