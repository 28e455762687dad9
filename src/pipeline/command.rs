// Command-line construction for the two transcoder stages
//
// Both stages use a fixed skeleton with values substituted from the session
// configuration. The encode stage reads raw s16le from stdin and emits the
// configured container to stdout; the decode stage reads that container from
// stdin and emits raw s16le to stdout. Anything beyond this skeleton belongs
// to the caller via `extra_args`.

use super::config::PipelineConfig;

/// Arguments for process A: raw PCM in, encoded container out.
pub fn encoder_args(config: &PipelineConfig) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        config.sample_rate.to_string(),
        "-ac".to_string(),
        config.channels.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-c:a".to_string(),
        config.codec_name.clone(),
        "-b:a".to_string(),
        config.bitrate.to_string(),
    ];
    args.extend(config.extra_args.iter().cloned());
    args.push("-f".to_string());
    args.push(config.encoder_container());
    args.push("pipe:1".to_string());
    args
}

/// Arguments for process B: encoded container in, raw PCM out.
pub fn decoder_args(config: &PipelineConfig) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-f".to_string(),
        config.decoder_container(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        config.sample_rate.to_string(),
        "-ac".to_string(),
        config.channels.to_string(),
        "pipe:1".to_string(),
    ]
}
