use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use xr_interaction::{assembler, classifier, cli, config, error, evaluator, extractor, logging, provider, scanner, store};
use classifier::{
    ChatClassifier, HttpChatBackend, HttpEmbeddingBackend, ProgressCursor, RunOutputs, RunSummary,
    SimilarityClassifier,
};
use cli::{Cli, Commands};
use config::Config;
use error::InteractionError;
use provider::ClassifierProvider;
use scanner::PatchIndex;

const DEFAULT_PROGRESS_FILE: &str = "progress.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);
    let config = Config::load().context("設定ファイルを読み込めません")?;

    match cli.command {
        Commands::Extract {
            interaction,
            semantic,
            images,
            output,
            csv,
            errors,
            crop_annotations,
            match_mode,
            naming,
            tolerance,
            all_matches,
        } => {
            println!("✂ xr-interaction - パッチ切り出し\n");

            let tolerance = tolerance.unwrap_or(config.bbox_tolerance);
            if tolerance.is_nan() || tolerance < 0.0 {
                return Err(InteractionError::Config(format!("許容誤差が不正です: {}", tolerance)).into());
            }

            // 1. 注釈読み込み
            println!("[1/3] 注釈を読み込み中...");
            let interaction_set = store::load_annotations(&interaction)
                .with_context(|| format!("インタラクション注釈を読み込めません: {}", interaction.display()))?;
            let semantic_set = semantic
                .as_deref()
                .map(store::load_annotations)
                .transpose()
                .context("セマンティック注釈を読み込めません")?;
            println!(
                "✔ 画像{}枚 / 注釈{}件\n",
                interaction_set.images.len(),
                interaction_set.annotations.len()
            );

            // 2. 切り出し
            println!("[2/3] 切り出し中... (mode: {:?}, tolerance: {})", match_mode, tolerance);
            let options = extractor::ExtractOptions {
                match_mode,
                naming,
                tolerance,
                first_match_only: !all_matches,
            };
            let report = extractor::extract_patches(&interaction_set, semantic_set.as_ref(), &images, &output, &options)?;
            println!("✔ {}行 / 画像{}件を出力\n", report.rows.len(), report.patches_written);

            // 3. 保存
            println!("[3/3] 結果を保存中...");
            let outputs = extractor::ExtractOutputs {
                patch_csv: csv.unwrap_or_else(|| output.join("patches.csv")),
                error_log: errors.unwrap_or_else(|| output.join("extract_errors.csv")),
                crop_annotations,
            };
            extractor::save_report(&report, &outputs)?;
            println!("✔ パッチCSV: {}", outputs.patch_csv.display());
            println!("✔ エラーログ: {}", outputs.error_log.display());
            if let Some(path) = &outputs.crop_annotations {
                println!("✔ 切り出しデータセット: {}", path.display());
            }

            if report.duplicates_removed > 0 {
                println!("  重複行を除去: {}件", report.duplicates_removed);
            }
            for (kind, count) in report.counts_by_kind() {
                println!("  {}: {}件", kind, count);
            }
            if report.images_skipped > 0 {
                println!("  読めなかった画像: {}枚", report.images_skipped);
            }

            println!("\n✅ 切り出し完了");
        }

        Commands::Classify { patches, annotations, patch_csv, output, batch_size, reset } => {
            println!("🔎 xr-interaction - パッチ分類 ({})\n", cli.provider);

            let output_dir = output.unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&output_dir)?;
            let outputs = RunOutputs {
                predictions: output_dir.join("predictions.csv"),
                similarity: cli
                    .provider
                    .has_score_vector()
                    .then(|| output_dir.join("similarity.csv")),
                errors: output_dir.join("classify_errors.csv"),
                progress: output_dir.join(DEFAULT_PROGRESS_FILE),
            };
            if reset && ProgressCursor::clear(&outputs.progress)? {
                println!("✔ 進捗をリセットしました");
            }

            // 1. パッチ・語彙
            println!("[1/3] パッチをスキャン中...");
            let files = scanner::scan_patch_folder(&patches)?;
            let index = PatchIndex::from_files(&files);
            let vocabulary = store::load_annotations(&annotations)
                .with_context(|| format!("語彙を読み込めません: {}", annotations.display()))?
                .vocabulary();
            if vocabulary.is_empty() {
                return Err(InteractionError::InvalidAnnotations(format!(
                    "categories が空です: {}",
                    annotations.display()
                ))
                .into());
            }
            let jobs = match &patch_csv {
                Some(path) => classifier::jobs_from_patch_rows(&store::read_patch_rows(path)?),
                None => classifier::jobs_from_folder(&files),
            };
            println!("✔ {}件のパッチ / 語彙{}件\n", jobs.len(), vocabulary.len());

            // 2. 分類
            let batch_size = batch_size.unwrap_or(config.default_batch_size);
            println!("[2/3] 分類中... (バッチサイズ {})", batch_size);
            let summary = match cli.provider {
                ClassifierProvider::Clip => {
                    let backend = HttpEmbeddingBackend::new(&config.embedding_endpoint, config.timeout_seconds)?;
                    let clip = SimilarityClassifier::new(backend, vocabulary, config.prompt_template.clone());
                    classifier::run_classification(&clip, &jobs, &index, &outputs, batch_size).await?
                }
                ClassifierProvider::Chat => {
                    let api_key = config.get_api_key()?;
                    let backend = HttpChatBackend::new(
                        &config.chat_endpoint,
                        &config.chat_model,
                        api_key,
                        config.timeout_seconds,
                    )?;
                    let chat = ChatClassifier::new(backend, vocabulary);
                    classifier::run_classification(&chat, &jobs, &index, &outputs, batch_size).await?
                }
            };
            println!("✔ 分類完了\n");

            // 3. 集計
            println!("[3/3] 集計");
            print_run_summary(&summary, &outputs);

            println!("\n✅ 分類完了");
        }

        Commands::Assemble { ground_truth, predictions, similarity, mode, output, truth_output } => {
            println!("🧩 xr-interaction - 結果の組み立て\n");

            let mut gt = store::load_annotations(&ground_truth)
                .with_context(|| format!("正解アノテーションを読み込めません: {}", ground_truth.display()))?;

            let resolved = match (&predictions, &similarity) {
                (Some(path), _) => assembler::predictions_from_labels(
                    &store::read_prediction_rows(path)?,
                    &gt,
                    assembler::DEFAULT_LABEL_SCORE,
                ),
                (None, Some(path)) => {
                    assembler::predictions_from_similarity(&store::read_similarity_table(path)?, &gt)
                }
                (None, None) => anyhow::bail!("--predictions か --similarity を指定してください"),
            };
            println!("✔ 予測{}件（カテゴリ不明 {}件）", resolved.predictions.len(), resolved.unresolved.len());

            match mode {
                assembler::AssembleMode::Results => {
                    let results = assembler::assemble_results(&gt, &resolved.predictions);
                    store::save_json(&output, &results)?;
                    println!("✔ 検出結果{}件: {}", results.len(), output.display());
                }
                assembler::AssembleMode::Overwrite => {
                    let replaced = assembler::overwrite_categories(&mut gt, &resolved.predictions);
                    store::save_json(&output, &gt)?;
                    println!("✔ {}件のカテゴリを上書き: {}", replaced, output.display());
                }
                assembler::AssembleMode::Dataset => {
                    let dataset = assembler::assemble_scored_dataset(&gt, &resolved.predictions);
                    store::save_json(&output, &dataset)?;
                    println!("✔ スコア付き注釈{}件: {}", dataset.annotations.len(), output.display());
                }
                assembler::AssembleMode::Paired => {
                    let truth_output = truth_output.ok_or_else(|| {
                        InteractionError::Config("paired モードには --truth-output が必要です".into())
                    })?;
                    let (truths, results) = assembler::assemble_paired(&gt, &resolved.predictions);
                    store::save_json(&truth_output, &truths)?;
                    store::save_json(&output, &results)?;
                    println!("✔ 正解{}件: {}", truths.len(), truth_output.display());
                    println!("✔ 予測{}件: {}", results.len(), output.display());
                }
            }

            println!("\n✅ 組み立て完了");
        }

        Commands::GroundTruth { annotations, patch_csv, output } => {
            println!("📋 xr-interaction - 正解データ作成\n");

            let gt = store::load_annotations(&annotations)?;
            let rows = store::read_patch_rows(&patch_csv)?;
            let filtered = assembler::filter_ground_truth(&gt, &rows);
            store::save_json(&output, &filtered)?;

            println!(
                "✔ {}件中{}件の注釈を保存: {}",
                gt.annotations.len(),
                filtered.annotations.len(),
                output.display()
            );
        }

        Commands::Evaluate { ground_truth, predictions, similarity, output, title, excel } => {
            println!("📊 xr-interaction - 評価\n");

            let gt = store::load_annotations(&ground_truth)
                .with_context(|| format!("正解アノテーションを読み込めません: {}", ground_truth.display()))?;

            let evaluation = match (&predictions, &similarity) {
                (Some(path), _) => evaluator::evaluate_predictions(&gt, &store::read_prediction_rows(path)?),
                (None, Some(path)) => evaluator::evaluate_similarity(
                    &gt,
                    &store::read_similarity_table(path)?,
                    &evaluator::DEFAULT_TOP_K,
                ),
                (None, None) => anyhow::bail!("--predictions か --similarity を指定してください"),
            };
            let metrics = &evaluation.metrics;

            println!("{}", evaluator::format_text_report(metrics, &title));
            if !evaluation.unmatched_patch_ids.is_empty() {
                println!("  正解のない予測: {}件", evaluation.unmatched_patch_ids.len());
            }

            let output_dir = output.unwrap_or_else(|| PathBuf::from("."));
            let text_path = output_dir.join("evaluation.txt");
            let metrics_path = output_dir.join("metrics.csv");
            let confusion_path = output_dir.join("confusion_matrix.csv");
            evaluator::write_text_report(&text_path, metrics, &title)?;
            evaluator::write_metrics_csv(&metrics_path, metrics)?;
            evaluator::write_confusion_csv(&confusion_path, &metrics.confusion)?;
            println!("✔ {}", text_path.display());
            println!("✔ {}", metrics_path.display());
            println!("✔ {}", confusion_path.display());

            if excel {
                let excel_path = output_dir.join("evaluation.xlsx");
                evaluator::write_excel_report(&excel_path, metrics, &title)?;
                println!("✔ {}", excel_path.display());
            }

            println!("\n✅ 評価完了");
        }

        Commands::Check { ground_truth, results } => {
            let gt = store::load_annotations(&ground_truth)?;
            let detections: Vec<xr_interaction_common::DetectionResult> = store::load_json(&results)?;
            let missing = assembler::missing_category_ids(&detections, &gt);

            if missing.is_empty() {
                println!("✔ すべてのカテゴリIDが正解に存在します（{}件）", detections.len());
            } else {
                println!("正解に存在しないカテゴリID: {:?}", missing);
            }
        }

        Commands::HighMatch { ground_truth, output } => {
            let gt = store::load_annotations(&ground_truth)?;
            let results = assembler::high_match_results(&gt);
            store::save_json(&output, &results)?;
            println!(
                "✔ スコア{}の検出結果{}件: {}",
                assembler::HIGH_MATCH_SCORE,
                results.len(),
                output.display()
            );
        }

        Commands::Dedup { input, output, analyze } => {
            if analyze {
                let stats = store::analyze_duplicates(&input)?;
                println!("重複分析: {}", input.display());
                println!("  総行数: {}", stats.total);
                println!("  重複行: {}", stats.duplicates);
                println!("  ユニーク: {}", stats.unique());
            } else {
                let target = output.unwrap_or_else(|| input.clone());
                let stats = store::dedup_csv_file(&input, &target)?;
                println!(
                    "✔ {}行中{}行の重複を除去: {}",
                    stats.total,
                    stats.duplicates,
                    target.display()
                );
            }
        }

        Commands::Progress { file, clear } => {
            let path = file.unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRESS_FILE));

            if clear {
                match ProgressCursor::clear(&path) {
                    Ok(true) => println!("✔ 進捗を削除しました: {}", path.display()),
                    Ok(false) => println!("進捗ファイルが存在しません"),
                    Err(e) => println!("進捗削除エラー: {}", e),
                }
            } else if path.exists() {
                let cursor = ProgressCursor::load(&path);
                println!("進捗情報:");
                println!("  パス: {}", path.display());
                println!("  次のインデックス: {}", cursor.next_index());
            } else {
                println!("進捗ファイルが存在しません: {}", path.display());
            }
        }

        Commands::Config { set_api_key, show } => {
            let mut config = config;

            if let Some(key) = set_api_key {
                config.set_api_key(key)?;
                println!("✔ APIキーを設定しました");
            }

            if show {
                println!("設定:");
                println!("  チャットAPI: {}", config.chat_endpoint);
                println!("  チャットモデル: {}", config.chat_model);
                println!("  埋め込みサーバ: {}", config.embedding_endpoint);
                println!("  プロンプト: {}", config.prompt_template);
                println!("  バッチサイズ: {}", config.default_batch_size);
                println!("  タイムアウト: {}秒", config.timeout_seconds);
                println!("  bbox許容誤差: {}", config.bbox_tolerance);
                println!("  APIキー: {}", if config.api_key.is_some() { "設定済み" } else { "未設定" });
            }
        }
    }

    Ok(())
}

fn print_run_summary(summary: &RunSummary, outputs: &RunOutputs) {
    println!("  対象: {}件（{}件目から）", summary.total, summary.start_index);
    println!("  処理: {}件 / 成功: {}件", summary.processed, summary.succeeded);
    for (reason, count) in &summary.skipped {
        println!("  スキップ ({}): {}件", reason, count);
    }
    if let Some(accuracy) = summary.accuracy() {
        println!("  正解率（パッチCSVの正解ラベル）: {:.4}", accuracy);
    }
    print_output("予測", &outputs.predictions);
    if let Some(path) = &outputs.similarity {
        print_output("類似度", path);
    }
    print_output("エラー", &outputs.errors);
}

fn print_output(label: &str, path: &Path) {
    println!("✔ {}: {}", label, path.display());
}
