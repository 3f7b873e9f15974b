use std::path::Path;

use sf_api::{compile_document, export_bundle, generate_story_markdown};
use sf_compiler::{CompileOptions, CompileResult};
use sf_core::{validate_bytes, StoryForgeError};
use sf_export::ExportOptions;

use crate::{
    find_story_files, json_line, load_config, load_story_document, read_bundle_bytes,
    story_stem, write_output, CompileArgs, CompileDirArgs, ExportArgs, ValidateArgs,
};

fn compile_error(result: &CompileResult) -> StoryForgeError {
    match result.errors.first() {
        Some(issue) => StoryForgeError::new(issue.code.as_str(), issue.message.clone()),
        None => StoryForgeError::new("CLI_COMPILE_FAILED", "Story did not compile."),
    }
}

fn compile_to_bytes(
    story: &Path,
    options: &CompileOptions,
) -> Result<(CompileResult, Vec<u8>), StoryForgeError> {
    let document = load_story_document(story)?;
    let mut result = compile_document(&document, options);
    if !result.success {
        return Err(compile_error(&result));
    }
    let bytes = result
        .bytes
        .take()
        .ok_or_else(|| StoryForgeError::new("CLI_COMPILE_FAILED", "Compiler produced no bytes."))?;
    Ok((result, bytes))
}

fn emit_warnings(result: &CompileResult) {
    for warning in &result.warnings {
        println!("WARNING:{}", warning.code.as_str());
    }
}

pub(crate) fn run_compile(args: CompileArgs) -> Result<i32, StoryForgeError> {
    let mut options = load_config(args.config.as_deref())?.compile;
    if let Some(format) = args.format {
        options.target_format = format.into();
    }

    let (result, bytes) = compile_to_bytes(Path::new(&args.story), &options)?;
    write_output(Path::new(&args.out), &bytes)?;
    let checksum = result
        .bundle
        .as_ref()
        .map(|bundle| bundle.checksum.as_str())
        .unwrap_or_default();

    println!("RESULT:OK");
    println!("BUNDLE_OUT:{}", args.out);
    println!("CHECKSUM:{}", checksum);
    println!(
        "STATS_JSON:{}",
        serde_json::to_string(&result.stats).unwrap_or_else(|_| "{}".to_string())
    );
    emit_warnings(&result);
    Ok(0)
}

pub(crate) fn run_compile_dir(args: CompileDirArgs) -> Result<i32, StoryForgeError> {
    let options = load_config(args.config.as_deref())?.compile;
    let files = find_story_files(Path::new(&args.stories_dir))?;
    if files.is_empty() {
        return Err(StoryForgeError::new(
            "CLI_SOURCE_EMPTY",
            format!("No {} files under {}", crate::STORY_SUFFIX, args.stories_dir),
        ));
    }

    let out_dir = Path::new(&args.out_dir);
    let mut compiled = Vec::new();
    let mut failed = Vec::new();
    for file in &files {
        match compile_to_bytes(file, &options) {
            Ok((_, bytes)) => {
                let out = out_dir.join(format!("{}.sfb", story_stem(file)));
                write_output(&out, &bytes)?;
                compiled.push(out);
            }
            Err(error) => {
                tracing::warn!(path = %file.display(), code = %error.code, "story failed to compile");
                failed.push((file.clone(), error));
            }
        }
    }

    if let Some((file, error)) = failed.first() {
        for (file, error) in &failed {
            println!("FAILED:{}:{}", file.display(), error.code);
        }
        return Err(StoryForgeError::new(
            "CLI_COMPILE_DIR_FAILED",
            format!(
                "{} of {} stories failed; first: {} ({})",
                failed.len(),
                files.len(),
                file.display(),
                error.message
            ),
        ));
    }

    println!("RESULT:OK");
    for out in compiled {
        println!("BUNDLE_OUT:{}", out.display());
    }
    Ok(0)
}

pub(crate) fn run_validate(args: ValidateArgs) -> Result<i32, StoryForgeError> {
    let bytes = read_bundle_bytes(Path::new(&args.bundle))?;
    let validation = validate_bytes(&bytes);
    if let Some(issue) = validation.errors.first() {
        let message = match &issue.details {
            Some(details) => format!("{} {}", issue.message, details),
            None => issue.message.clone(),
        };
        return Err(StoryForgeError::new(issue.code.as_str(), message));
    }

    println!("RESULT:OK");
    if let Some(bundle) = &validation.bundle {
        println!("VERSION:{}", bundle.version);
        println!("CHECKSUM:{}", bundle.checksum);
        println!("CARDS:{}", bundle.metadata.card_count);
    }
    for warning in &validation.warnings {
        println!("WARNING:{}", warning.code.as_str());
        println!("WARNING_MSG_JSON:{}", json_line(&warning.message));
    }
    Ok(0)
}

pub(crate) fn run_export(args: ExportArgs) -> Result<i32, StoryForgeError> {
    let out = Path::new(&args.out);
    let Some(format) = args.format.bundle_format() else {
        let document = load_story_document(Path::new(&args.story))?;
        let markdown = generate_story_markdown(
            &document.stack,
            &document.cards,
            &document.choices,
            &document.characters,
        );
        write_output(out, markdown.as_bytes())?;
        println!("RESULT:OK");
        println!("ARTIFACT_OUT:{}", args.out);
        println!("CONTENT_TYPE:text/markdown; charset=utf-8");
        println!("BYTES:{}", markdown.len());
        return Ok(0);
    };

    let options = load_config(args.config.as_deref())?.compile;
    let document = load_story_document(Path::new(&args.story))?;
    let result = compile_document(&document, &options);
    if !result.success {
        return Err(compile_error(&result));
    }
    let artifact = export_bundle(
        &result,
        &ExportOptions {
            format,
            title: args.title,
            file_stem: None,
        },
    )
    .ok_or_else(|| StoryForgeError::new("CLI_EXPORT_FAILED", "Bundle could not be exported."))?;
    write_output(out, &artifact.bytes)?;

    println!("RESULT:OK");
    println!("ARTIFACT_OUT:{}", args.out);
    println!("CONTENT_TYPE:{}", artifact.content_type);
    println!("BYTES:{}", artifact.size());
    emit_warnings(&result);
    Ok(0)
}
