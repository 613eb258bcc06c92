//! Reading trees (Newick, BEAST/NEXUS) and community tables, writing TSV.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use phylotree::tree::Tree as PhyloTree;
use tracing::{debug, warn};

use crate::community::{CommunityStats, CommunityTable};
use crate::error::{PhyloError, Result};
use crate::taxon::TaxonNamespace;
use crate::tree::Tree;

/// Strip BEAST annotations from Newick strings.
///
/// BEAST format includes annotations like :[&rate=0.123]2.45 where 2.45 is the actual branch length.
/// This function removes the [&...] annotations while preserving the branch lengths.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

fn clean_label(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(trimmed);
    unquoted.to_string()
}

/// Parses one Newick string into a [`Tree`] bound to `namespace`.
///
/// Leaf names become taxa (created in the namespace on first sight, in
/// left-to-right leaf order); internal names become node labels. A `[&R]`
/// before the first parenthesis marks the tree as rooted; any other `[&...]`
/// annotation is dropped.
pub fn tree_from_newick(newick: &str, namespace: &Arc<TaxonNamespace>) -> Result<Tree> {
    parse_newick(newick, namespace, None)
}

fn parse_newick(
    newick: &str,
    namespace: &Arc<TaxonNamespace>,
    translate: Option<&HashMap<String, String>>,
) -> Result<Tree> {
    let trimmed = newick.trim();
    // BEAST writes other comments (e.g. `[&lnP=...]`) ahead of the rooting flag
    let head = &trimmed[..trimmed.find('(').unwrap_or(trimmed.len())];
    let rooted = head.to_ascii_uppercase().contains("[&R]");

    let mut cleaned = strip_beast_annotations(trimmed).trim().to_string();
    if cleaned.is_empty() {
        return Err(PhyloError::Newick("empty Newick string".to_string()));
    }
    if !cleaned.ends_with(';') {
        cleaned.push(';');
    }

    let source = PhyloTree::from_newick(&cleaned).map_err(|e| PhyloError::Newick(e.to_string()))?;
    let mut tree = convert_phylotree(&source, namespace, translate)?;
    tree.is_rooted = rooted;
    debug!(nodes = tree.num_nodes(), rooted, "parsed Newick tree");
    Ok(tree)
}

/// Copies a parsed `phylotree` tree into the arena representation, pre-order
/// with children kept in their written order.
fn convert_phylotree(
    source: &PhyloTree,
    namespace: &Arc<TaxonNamespace>,
    translate: Option<&HashMap<String, String>>,
) -> Result<Tree> {
    let parse_err = |e: phylotree::tree::TreeError| PhyloError::Newick(e.to_string());

    let root = source.get_root().map_err(parse_err)?;
    let mut tree = Tree::new(Arc::clone(namespace));
    let seed = tree.seed_node()?;

    let mut stack = vec![(root, seed)];
    while let Some((src_id, dst_id)) = stack.pop() {
        let src = source.get(&src_id).map_err(parse_err)?;
        let name = src
            .name
            .as_deref()
            .map(clean_label)
            .filter(|s| !s.is_empty());

        if src.children.is_empty() {
            if let Some(label) = name {
                let label = translate
                    .and_then(|map| map.get(&label).cloned())
                    .unwrap_or(label);
                let taxon = namespace.get_or_create(&label);
                tree.node_mut(dst_id).set_taxon(Some(taxon));
            }
        } else {
            tree.node_mut(dst_id).set_label(name);
        }
        tree.set_edge_length(dst_id, src.parent_edge);

        let children: Vec<_> = src
            .children
            .iter()
            .map(|&child| (child, tree.new_child(dst_id, None, None)))
            .collect();
        stack.extend(children.into_iter().rev());
    }
    Ok(tree)
}

/// Reads a BEAST `.trees` (NEXUS) file.
///
/// Returns the TRANSLATE table and the kept trees, named
/// `<file stem>_tree_STATE<n>`. Trees that fail to parse are skipped with a
/// warning.
pub fn read_beast_trees<P: AsRef<Path>>(
    path: P,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
    namespace: &Arc<TaxonNamespace>,
) -> Result<(HashMap<String, String>, Vec<(String, Tree)>)> {
    let content = fs::read_to_string(path.as_ref())?;
    let base_name = base_name(path.as_ref(), ".trees");
    Ok(parse_beast_trees(
        &content,
        &base_name,
        burnin_trees,
        burnin_states,
        use_real_taxa,
        namespace,
    ))
}

fn base_name(path: &Path, extension: &str) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.trim_end_matches(extension))
        .unwrap_or("unknown")
        .to_string()
}

/// [`read_beast_trees`] on in-memory NEXUS text.
pub fn parse_beast_trees(
    content: &str,
    base_name: &str,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
    namespace: &Arc<TaxonNamespace>,
) -> (HashMap<String, String>, Vec<(String, Tree)>) {
    let taxons = parse_taxon_block(content);
    let translate = use_real_taxa.then_some(&taxons);

    let trees = collect_tree_blocks(content)
        .into_iter()
        .enumerate()
        .map(|(idx, tree)| {
            let state = extract_state(tree.header);
            (idx, tree, state, format!("{base_name}_tree_STATE{state}"))
        })
        // burn-in by count and/or by state; both 0 keeps everything
        .filter(|(idx, _tree, state, _name)| {
            (burnin_trees == 0 && burnin_states == 0)
                || (burnin_trees > 0 && *idx >= burnin_trees)
                || (burnin_states > 0 && *state > burnin_states)
        })
        .filter_map(|(idx, tree, _state, name)| {
            match parse_newick(&tree.body, namespace, translate) {
                Ok(t) => Some((name, t)),
                Err(e) => {
                    warn!(index = idx, error = %e, "failed to parse tree, skipping");
                    None
                }
            }
        })
        .collect::<Vec<_>>();

    debug!(taxa = taxons.len(), trees = trees.len(), "read BEAST trees");
    (taxons, trees)
}

fn extract_state(header: &str) -> usize {
    if let Some(start) = header.to_ascii_uppercase().find("STATE_") {
        let rest = &header[start + "STATE_".len()..];
        let state = rest
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>();
        if let Ok(num) = state.parse::<usize>() {
            return num;
        }
    }
    0
}

struct TreeBlock<'a> {
    header: &'a str,
    body: String,
}

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .skip_while(|line| !line.trim_start().to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.trim().to_ascii_uppercase().starts_with("END;"))
        .filter_map(|line| {
            let mut parts = line.splitn(2, " = ");
            let header = parts.next()?.trim();
            let body = parts.next()?.trim().to_string();
            Some(TreeBlock { header, body })
        })
        .collect()
}

fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        // 1 '1959.M.CD.59.ZR59',
        // 2 '1960.DRC60A',
        .filter_map(|line| {
            let line = line.trim().trim_end_matches(';').trim_end_matches(',');
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect::<HashMap<_, _>>()
}

/// Reads a file with one Newick tree per `;`, naming trees
/// `<file stem>_tree<n>`. The first `burnin_trees` trees are dropped.
pub fn read_newick_trees<P: AsRef<Path>>(
    path: P,
    burnin_trees: usize,
    namespace: &Arc<TaxonNamespace>,
) -> Result<Vec<(String, Tree)>> {
    let content = fs::read_to_string(path.as_ref())?;
    let stem = path
        .as_ref()
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();
    parse_newick_trees(&content, &stem, burnin_trees, namespace)
}

/// [`read_newick_trees`] on in-memory text.
pub fn parse_newick_trees(
    content: &str,
    base_name: &str,
    burnin_trees: usize,
    namespace: &Arc<TaxonNamespace>,
) -> Result<Vec<(String, Tree)>> {
    content
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .skip(burnin_trees)
        .map(|(idx, newick)| Ok((format!("{base_name}_tree{idx}"), tree_from_newick(newick, namespace)?)))
        .collect()
}

/// Reads trees from either a NEXUS/BEAST file or a plain Newick file,
/// depending on whether the file starts with `#NEXUS`.
pub fn read_trees<P: AsRef<Path>>(
    path: P,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
    namespace: &Arc<TaxonNamespace>,
) -> Result<Vec<(String, Tree)>> {
    let content = fs::read_to_string(path.as_ref())?;
    let is_nexus = content
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("#NEXUS"));

    if is_nexus {
        let base = base_name(path.as_ref(), ".trees");
        let (_, trees) = parse_beast_trees(
            &content,
            &base,
            burnin_trees,
            burnin_states,
            use_real_taxa,
            namespace,
        );
        Ok(trees)
    } else {
        if burnin_states > 0 {
            warn!("burn-in by state is ignored for Newick input");
        }
        let stem = path
            .as_ref()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        parse_newick_trees(&content, &stem, burnin_trees, namespace)
    }
}

/// Reads a community table (see [`CommunityTable::parse`]).
pub fn read_community_table<P: AsRef<Path>>(path: P) -> Result<CommunityTable> {
    let content = fs::read_to_string(path.as_ref())?;
    CommunityTable::parse(&content)
}

/// Opens `path` for writing, gzip-compressed when it ends with `.gz`.
/// `-` (stdout) is rejected.
fn create_output(path: &Path) -> io::Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "writing to stdout is not supported",
        ));
    }

    let file = File::create(path)?;
    if path.to_string_lossy().ends_with(".gz") {
        let enc = GzEncoder::new(file, Compression::default());
        Ok(Box::new(BufWriter::new(enc)))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Write a labeled square matrix as TSV.
/// If `path` ends with `.gz`, the output is gzip-compressed.
pub fn write_matrix_tsv<P: AsRef<Path>, T: std::fmt::Display>(
    path: P,
    names: &[String],
    mat: &[Vec<T>],
) -> io::Result<()> {
    let mut out = create_output(path.as_ref())?;

    write!(&mut out, "\t")?;
    for (k, name) in names.iter().enumerate() {
        if k > 0 {
            write!(&mut out, "\t")?;
        }
        write!(&mut out, "{}", name)?;
    }
    writeln!(&mut out)?;

    for (name, row) in names.iter().zip(mat) {
        write!(&mut out, "{}", name)?;
        for val in row {
            write!(&mut out, "\t{}", val)?;
        }
        writeln!(&mut out)?;
    }

    out.flush()?;
    Ok(())
}

/// Write per-tree, per-sample community statistics as TSV. Undefined
/// statistics (fewer than two taxa present) are written as `NA`.
pub fn write_stats_tsv<P: AsRef<Path>>(
    path: P,
    rows: &[(String, CommunityStats)],
) -> io::Result<()> {
    let mut out = create_output(path.as_ref())?;
    let fmt = |v: Option<f64>| v.map_or_else(|| "NA".to_string(), |x| x.to_string());

    writeln!(&mut out, "tree\tsample\ttaxa\tmpd\tmntd")?;
    for (tree, stats) in rows {
        writeln!(
            &mut out,
            "{}\t{}\t{}\t{}\t{}",
            tree,
            stats.sample,
            stats.num_taxa,
            fmt(stats.mpd),
            fmt(stats.mntd)
        )?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    const BEAST: &str = "#NEXUS

Begin taxa;
\tDimensions ntax=3;
End;

Begin trees;
\tTranslate
\t\t1 'alpha',
\t\t2 'beta',
\t\t3 'gamma'
\t\t;
tree STATE_0 = [&lnP=-10.5] [&R] ((1:[&rate=0.5]1.0,2:1.0):0.5,3:1.5);
tree STATE_1000 = [&lnP=-9.1] [&R] ((1:1.0,3:1.0):0.5,2:1.5);
tree STATE_2000 = [&lnP=-8.7] [&R] ((2:1.0,3:1.0):0.5,1:1.5);
End;
";

    #[test]
    fn test_strip_beast_annotations() {
        assert_eq!(
            strip_beast_annotations("(A:[&rate=0.1]1.0,B:2.0)[&height=3];"),
            "(A:1.0,B:2.0);"
        );
        assert_eq!(strip_beast_annotations("(A,B)[comment];"), "(A,B)[comment];");
    }

    #[test]
    fn test_tree_from_newick() {
        let ns = TaxonNamespace::shared();
        let tree = tree_from_newick("((A:1,B:2)AB:3,C:4);", &ns).unwrap();

        assert!(!tree.is_rooted);
        assert_eq!(ns.len(), 3);
        assert_eq!(ns.get("A").unwrap().index(), 0);
        assert_eq!(ns.get("C").unwrap().index(), 2);
        assert_eq!(tree.leaf_nodes().len(), 3);

        let ab = tree.find_node(|n| n.label() == Some("AB")).unwrap();
        assert_eq!(tree.edge_length(ab), Some(3.0));
        let b = tree.find_node_for_taxon(&ns.get("B").unwrap()).unwrap();
        assert_eq!(tree.edge_length(b), Some(2.0));
        tree.debug_check_tree(false).unwrap();
    }

    #[test]
    fn test_tree_from_newick_rooted_and_shared() {
        let ns = TaxonNamespace::shared();
        let t1 = tree_from_newick("[&R] ((A:1,B:1):1,C:2);", &ns).unwrap();
        let t2 = tree_from_newick("((C:1,B:1):1,A:2)", &ns).unwrap();
        assert!(t1.is_rooted);
        assert!(!t2.is_rooted);
        assert_eq!(ns.len(), 3);
        let a = ns.get("A").unwrap();
        assert!(t1.find_node_for_taxon(&a).is_some());
        assert!(t2.find_node_for_taxon(&a).is_some());
    }

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label(" 'Homo sapiens' "), "Homo sapiens");
        assert_eq!(clean_label("\"x\""), "x");
        assert_eq!(clean_label("plain"), "plain");
    }

    #[test]
    fn test_tree_from_newick_rejects_empty() {
        let ns = TaxonNamespace::shared();
        assert!(matches!(
            tree_from_newick("  ", &ns),
            Err(PhyloError::Newick(_))
        ));
    }

    #[test]
    fn test_parse_beast_trees() {
        let ns = TaxonNamespace::shared();
        let (taxons, trees) = parse_beast_trees(BEAST, "run", 0, 0, true, &ns);

        assert_eq!(taxons.len(), 3);
        assert_eq!(taxons["2"], "beta");
        assert_eq!(trees.len(), 3);
        assert_eq!(trees[1].0, "run_tree_STATE1000");
        assert!(trees.iter().all(|(_, t)| t.is_rooted));
        assert!(ns.get("alpha").is_some());
        assert!(ns.get("1").is_none());

        let first = &trees[0].1;
        let alpha = first.find_node_for_taxon(&ns.get("alpha").unwrap()).unwrap();
        assert_eq!(first.edge_length(alpha), Some(1.0));
    }

    #[test]
    fn test_parse_beast_trees_burnin() {
        let ns = TaxonNamespace::shared();
        let (_, by_count) = parse_beast_trees(BEAST, "run", 2, 0, false, &ns);
        assert_eq!(by_count.len(), 1);
        assert_eq!(by_count[0].0, "run_tree_STATE2000");
        assert!(ns.get("1").is_some());

        let (_, by_state) = parse_beast_trees(BEAST, "run", 0, 500, false, &ns);
        assert_eq!(by_state.len(), 2);
    }

    #[test]
    fn test_parse_newick_trees() {
        let ns = TaxonNamespace::shared();
        let trees = parse_newick_trees("(A,B,C);\n((A,B),C);\n\n", "set", 0, &ns).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[1].0, "set_tree1");

        let skipped = parse_newick_trees("(A,B,C);((A,B),C);", "set", 1, &ns).unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].0, "set_tree1");
    }

    #[test]
    fn test_write_matrix_tsv_gz() {
        let dir = std::env::temp_dir().join(format!("phylo-io-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let names = vec!["a".to_string(), "b".to_string()];
        let mat = vec![vec![0.0, 1.5], vec![1.5, 0.0]];

        let plain = dir.join("m.tsv");
        write_matrix_tsv(&plain, &names, &mat).unwrap();
        assert_eq!(
            fs::read_to_string(&plain).unwrap(),
            "\ta\tb\na\t0\t1.5\nb\t1.5\t0\n"
        );

        let gz = dir.join("m.tsv.gz");
        write_matrix_tsv(&gz, &names, &mat).unwrap();
        let mut text = String::new();
        GzDecoder::new(File::open(&gz).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.starts_with("\ta\tb\n"));

        assert!(write_matrix_tsv("-", &names, &mat).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_stats_tsv() {
        let dir = std::env::temp_dir().join(format!("phylo-stats-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stats.tsv");
        let rows = vec![(
            "t0".to_string(),
            CommunityStats {
                sample: "s1".to_string(),
                num_taxa: 1,
                mpd: None,
                mntd: None,
            },
        )];
        write_stats_tsv(&path, &rows).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "tree\tsample\ttaxa\tmpd\tmntd\nt0\ts1\t1\tNA\tNA\n"
        );
        fs::remove_dir_all(&dir).unwrap();
    }
}
