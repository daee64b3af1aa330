use ffmpeg_next::codec;

/// Decode backends, in the order they are tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelerationTier {
    /// NVIDIA NVDEC, through FFmpeg's `*_cuvid` decoders.
    Cuda,
    /// Intel Quick Sync Video, through FFmpeg's `*_qsv` decoders.
    QuickSync,
    /// FFmpeg's native software decoder for the codec.
    Software,
}

impl AccelerationTier {
    pub const PROBE_ORDER: [AccelerationTier; 3] = [
        AccelerationTier::Cuda,
        AccelerationTier::QuickSync,
        AccelerationTier::Software,
    ];

    pub fn is_hardware(&self) -> bool {
        !matches!(self, AccelerationTier::Software)
    }

    fn decoder_suffix(&self) -> Option<&'static str> {
        match self {
            AccelerationTier::Cuda => Some("cuvid"),
            AccelerationTier::QuickSync => Some("qsv"),
            AccelerationTier::Software => None,
        }
    }
}

/// Why a tier could not be used. Never surfaces to callers; the next tier is
/// tried instead.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("hardware decoding is disabled")]
    Disabled,
    #[error("no {tier:?} decoder variant exists for codec {codec:?}")]
    NoDecoderVariant {
        tier: AccelerationTier,
        codec: codec::Id,
    },
    #[error("decoder {0} is not part of this FFmpeg build")]
    DecoderNotBuilt(String),
    #[error("failed to open {tier:?} decoder: {source}")]
    Open {
        tier: AccelerationTier,
        #[source]
        source: ffmpeg_next::Error,
    },
}

/// Returns the FFmpeg decoder name for `codec` on the given tier.
///
/// Returns `None` for [AccelerationTier::Software] (the default decoder is used)
/// and for codecs that have no accelerated variant.
pub fn decoder_name(codec: codec::Id, tier: AccelerationTier) -> Option<String> {
    let suffix = tier.decoder_suffix()?;
    let base = match codec {
        codec::Id::H264 => "h264",
        codec::Id::HEVC => "hevc",
        codec::Id::MPEG2VIDEO => "mpeg2",
        codec::Id::MPEG4 => "mpeg4",
        codec::Id::VC1 => "vc1",
        codec::Id::VP8 => "vp8",
        codec::Id::VP9 => "vp9",
        codec::Id::AV1 => "av1",
        codec::Id::MJPEG => "mjpeg",
        _ => return None,
    };
    Some(format!("{}_{}", base, suffix))
}

fn build_threading_config() -> codec::threading::Config {
    let mut config = codec::threading::Config::default();
    config.count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.kind = codec::threading::Type::Frame;
    config
}

// Attempts to open a decoder for the stream on a single tier.
fn probe(
    tier: AccelerationTier,
    parameters: codec::Parameters,
    threaded: bool,
) -> Result<codec::decoder::Video, ProbeError> {
    let codec_id = parameters.id();
    let mut ctx = codec::context::Context::from_parameters(parameters)
        .map_err(|source| ProbeError::Open { tier, source })?;
    if threaded {
        ctx.set_threading(build_threading_config());
    }
    let decoder = ctx.decoder();

    if !tier.is_hardware() {
        return decoder
            .video()
            .map_err(|source| ProbeError::Open { tier, source });
    }

    let name = decoder_name(codec_id, tier).ok_or(ProbeError::NoDecoderVariant {
        tier,
        codec: codec_id,
    })?;
    let codec = ffmpeg_next::decoder::find_by_name(&name)
        .ok_or_else(|| ProbeError::DecoderNotBuilt(name.clone()))?;

    decoder
        .open_as(codec)
        .and_then(|opened| opened.video())
        .map_err(|source| ProbeError::Open { tier, source })
}

/// Walks [AccelerationTier::PROBE_ORDER] and returns the first decoder that opens.
///
/// Hardware failures are logged and skipped. If even the software decoder fails,
/// the codec is unsupported and the video can't be used.
pub(crate) fn negotiate(
    stream: &ffmpeg_next::format::stream::Stream,
    hardware: bool,
    threaded: bool,
) -> crate::Result<(codec::decoder::Video, AccelerationTier)> {
    let codec_id = stream.parameters().id();

    for tier in AccelerationTier::PROBE_ORDER {
        let result = if tier.is_hardware() && !hardware {
            Err(ProbeError::Disabled)
        } else {
            probe(tier, stream.parameters(), threaded)
        };

        match result {
            Ok(decoder) => {
                if tier.is_hardware() {
                    tracing::info!(?tier, codec = ?codec_id, "using hardware decoder");
                } else if hardware {
                    tracing::info!(codec = ?codec_id, "no hardware decoder available; decoding in software");
                }
                return Ok((decoder, tier));
            }
            Err(e) => tracing::debug!(?tier, error = %e, "decoder tier unavailable"),
        }
    }

    Err(crate::Error::UnsupportedCodec(codec_id))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decoder_name_lookup() {
        assert_eq!(
            decoder_name(codec::Id::H264, AccelerationTier::Cuda).as_deref(),
            Some("h264_cuvid")
        );
        assert_eq!(
            decoder_name(codec::Id::HEVC, AccelerationTier::QuickSync).as_deref(),
            Some("hevc_qsv")
        );
        assert_eq!(
            decoder_name(codec::Id::MPEG2VIDEO, AccelerationTier::Cuda).as_deref(),
            Some("mpeg2_cuvid")
        );
    }

    #[test]
    fn test_software_tier_has_no_variant() {
        assert_eq!(decoder_name(codec::Id::H264, AccelerationTier::Software), None);
    }

    #[test]
    fn test_unknown_codec_has_no_variant() {
        assert_eq!(decoder_name(codec::Id::PNG, AccelerationTier::Cuda), None);
        assert_eq!(decoder_name(codec::Id::PNG, AccelerationTier::QuickSync), None);
    }

    #[test]
    fn test_probe_order_ends_in_software() {
        assert_eq!(
            AccelerationTier::PROBE_ORDER.last(),
            Some(&AccelerationTier::Software)
        );
        assert!(AccelerationTier::PROBE_ORDER[..2]
            .iter()
            .all(|tier| tier.is_hardware()));
    }
}
