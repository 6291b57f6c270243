//! Sample encryption fix-ups.
//!
//! PIFF fragments carry per-sample IVs in a `uuid` box. Standard readers
//! expect a `senc` box plus `saiz`/`saio` boxes that locate the same data
//! as sample auxiliary information.

use tracing::debug;

use crate::boxes::{BoxKind, Mp4Box, Record, Saio, Saiz};

/// Rename the PIFF sample encryption box to `senc` and add whichever of
/// `saiz` / `saio` is missing. Returns whether the track fragment is
/// encrypted at all.
///
/// The `saio` offset is left as a placeholder; it can only be computed
/// once the final layout of the fragment is known (see [`aux_info_offset`]).
pub(crate) fn normalize(traf: &mut Mp4Box) -> bool {
    if let Some(piff) = traf.child_mut(BoxKind::PiffSampleEncryption) {
        piff.retype(BoxKind::Senc);
        if let Some(senc) = piff.as_sample_encryption_mut() {
            senc.strip_override();
        }
        debug!("retyped PIFF sample encryption box to senc");
    }

    let Some(senc) = traf.child(BoxKind::Senc).and_then(Mp4Box::as_sample_encryption) else {
        return false;
    };

    let saiz = if senc.uses_subsamples() {
        Saiz::from_sizes(senc.aux_info_sizes())
    } else {
        Saiz::with_default(senc.iv_size, senc.samples.len() as u32)
    };

    if traf.child(BoxKind::Saiz).is_none() {
        debug!(
            default_size = saiz.default_sample_info_size,
            samples = saiz.sample_count,
            "synthesized saiz"
        );
        traf.push_child(Mp4Box::from_record(BoxKind::Saiz, Record::Saiz(saiz)));
    }
    if traf.child(BoxKind::Saio).is_none() {
        debug!("synthesized saio");
        traf.push_child(Mp4Box::from_record(BoxKind::Saio, Record::Saio(Saio::single())));
    }
    true
}

/// Offset of the first sample's auxiliary information, counted from the
/// start of `moof`: where the `senc` per-sample table begins.
pub(crate) fn aux_info_offset(moof: &Mp4Box) -> Option<u64> {
    let traf_offset = moof.byte_offset_of(BoxKind::Traf)?;
    let traf = moof.child(BoxKind::Traf)?;
    let senc_offset = traf.byte_offset_of(BoxKind::Senc)?;
    let senc = traf.child(BoxKind::Senc)?;
    let table = senc.as_sample_encryption()?.table_offset();
    Some(traf_offset + senc_offset + senc.header_len() + table)
}

/// Point the `saio` box at `offset`.
pub(crate) fn set_aux_info_offset(traf: &mut Mp4Box, offset: u64) {
    let Some(saio) = traf.child_mut(BoxKind::Saio).and_then(Mp4Box::as_saio_mut) else {
        return;
    };
    match saio.offsets.first_mut() {
        Some(first) => *first = offset,
        None => saio.offsets.push(offset),
    }
    if offset > u32::MAX as u64 {
        saio.version = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{
        EncryptedSample, SampleEncryption, Subsample, Tfhd, TrackEncryptionOverride,
    };

    fn sample(ranges: usize) -> EncryptedSample {
        EncryptedSample {
            iv: vec![0xAB; 8],
            subsamples: (0..ranges)
                .map(|_| Subsample {
                    clear_bytes: 16,
                    protected_bytes: 512,
                })
                .collect(),
        }
    }

    fn traf_with(kind: BoxKind, senc: SampleEncryption) -> Mp4Box {
        Mp4Box::container(
            BoxKind::Traf,
            vec![
                Mp4Box::from_record(BoxKind::Tfhd, Record::Tfhd(Tfhd::default())),
                Mp4Box::from_record(kind, Record::SampleEncryption(senc)),
            ],
        )
    }

    fn senc(flags: u32, samples: Vec<EncryptedSample>) -> SampleEncryption {
        SampleEncryption {
            version: 0,
            flags,
            track_override: None,
            iv_size: 8,
            samples,
        }
    }

    #[test]
    fn uniform_subsample_sizes_collapse_to_default() {
        let mut traf = traf_with(
            BoxKind::PiffSampleEncryption,
            senc(SampleEncryption::USE_SUBSAMPLE_ENCRYPTION, vec![sample(1), sample(1)]),
        );
        assert!(normalize(&mut traf));

        assert!(traf.child(BoxKind::PiffSampleEncryption).is_none());
        let saiz = traf.child(BoxKind::Saiz).and_then(Mp4Box::as_saiz).unwrap();
        assert_eq!(saiz.default_sample_info_size, 16);
        assert_eq!(saiz.sample_count, 2);
        assert!(saiz.sample_info_sizes.is_empty());

        let kinds: Vec<_> = traf.children().iter().map(Mp4Box::kind).collect();
        assert_eq!(
            kinds,
            vec![BoxKind::Tfhd, BoxKind::Senc, BoxKind::Saiz, BoxKind::Saio]
        );
    }

    #[test]
    fn mixed_subsample_sizes_keep_table() {
        let mut traf = traf_with(
            BoxKind::Senc,
            senc(SampleEncryption::USE_SUBSAMPLE_ENCRYPTION, vec![sample(1), sample(2)]),
        );
        normalize(&mut traf);
        let saiz = traf.child(BoxKind::Saiz).and_then(Mp4Box::as_saiz).unwrap();
        assert_eq!(saiz.default_sample_info_size, 0);
        assert_eq!(saiz.sample_info_sizes, vec![16, 22]);
    }

    #[test]
    fn iv_only_uses_iv_size() {
        let mut traf = traf_with(BoxKind::Senc, senc(0, vec![sample(0); 3]));
        normalize(&mut traf);
        let saiz = traf.child(BoxKind::Saiz).and_then(Mp4Box::as_saiz).unwrap();
        assert_eq!(saiz.default_sample_info_size, 8);
        assert_eq!(saiz.sample_count, 3);
    }

    #[test]
    fn override_fields_are_dropped_on_retype() {
        let mut piff = senc(
            SampleEncryption::OVERRIDE_TRACK_ENCRYPTION,
            vec![sample(0)],
        );
        piff.track_override = Some(TrackEncryptionOverride {
            algorithm_id: 1,
            iv_size: 8,
            kid: [7; 16],
        });
        let mut traf = traf_with(BoxKind::PiffSampleEncryption, piff);
        normalize(&mut traf);

        let senc = traf
            .child(BoxKind::Senc)
            .and_then(Mp4Box::as_sample_encryption)
            .unwrap();
        assert!(senc.track_override.is_none());
        assert_eq!(senc.flags & SampleEncryption::OVERRIDE_TRACK_ENCRYPTION, 0);
        assert_eq!(senc.table_offset(), 8);
    }

    #[test]
    fn clear_fragment_is_untouched() {
        let mut traf = Mp4Box::container(
            BoxKind::Traf,
            vec![Mp4Box::from_record(BoxKind::Tfhd, Record::Tfhd(Tfhd::default()))],
        );
        assert!(!normalize(&mut traf));
        assert_eq!(traf.children().len(), 1);
    }

    #[test]
    fn offset_points_past_senc_header() {
        let mut traf = traf_with(BoxKind::Senc, senc(0, vec![sample(0)]));
        normalize(&mut traf);
        let moof = Mp4Box::container(BoxKind::Moof, vec![traf]);

        // moof header 8 + traf header 8 + tfhd (8 + 8) + senc header 8 + 8.
        assert_eq!(aux_info_offset(&moof), Some(8 + 8 + 16 + 8 + 8));
    }
}
