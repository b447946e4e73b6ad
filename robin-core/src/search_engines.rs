//! Dark web search engine registry
//!
//! Provides the default list of onion search endpoints with their URL templates.

use serde::{Deserialize, Serialize};

/// A search source endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEngine {
    /// Human-readable name
    pub name: String,
    /// URL template with {query} placeholder
    pub url_template: String,
    /// Whether this engine should be queried
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl SearchEngine {
    pub fn new(name: &str, url_template: &str) -> Self {
        Self {
            name: name.to_string(),
            url_template: url_template.to_string(),
            active: true,
        }
    }

    /// Build search URL for a query
    pub fn build_url(&self, query: &str) -> String {
        self.url_template.replace("{query}", &encode_query(query))
    }

    /// Host part of the template, used to recognise self-links
    pub fn host(&self) -> Option<&str> {
        let rest = self.url_template.split_once("://")?.1;
        rest.split(['/', '?']).next().filter(|h| !h.is_empty())
    }
}

/// Percent-encode a query, with spaces as `+`
pub fn encode_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| urlencoding::encode(word).into_owned())
        .collect::<Vec<_>>()
        .join("+")
}

const DEFAULT_ENDPOINTS: &[(&str, &str)] = &[
    ("Ahmia", "http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion/search/?q={query}"),
    ("OnionLand", "http://3bbad7fauom4d6sgppalyqddsqbf5u5p56b5k5uk2zxsy3d6ey2jobad.onion/search?q={query}"),
    ("DarkHunt", "http://darkhuntyla64h75a3re5e2l3367lqn7ltmdzpgmr6b4nbz3q2iaxrid.onion/search?q={query}"),
    ("Torgle", "http://iy3544gmoeclh5de6gez2256v6pjh4omhpqdh2wpeeppjtvqmjhkfwad.onion/torgle/?query={query}"),
    ("Amnesia", "http://amnesia7u5odx5xbwtpnqk3edybgud5bmiagu75bnqx2crntw5kry7ad.onion/search?query={query}"),
    ("Kaizer", "http://kaizerwfvp5gxu6cppibp7jhcqptavq3iqef66wbxenh6a2fklibdvid.onion/search?q={query}"),
    ("Anima", "http://anima4ffe27xmakwnseih3ic2y7y3l6e7fucwk4oerdn4odf7k74tbid.onion/search?q={query}"),
    ("Tornado", "http://tornadoxn3viscgz647shlysdy7ea5zqzwda7hierekeuokh5eh5b3qd.onion/search?q={query}"),
    ("TorNet", "http://tornetupfu7gcgidt33ftnungxzyfq2pygui5qdoyss34xbgx2qruzid.onion/search?q={query}"),
    ("Torland", "http://torlbmqwtudkorme6prgfpmsnile7ug2zm4u3ejpcncxuhpu4k2j4kyd.onion/index.php?a=search&q={query}"),
    ("FindTor", "http://findtorroveq5wdnipkaojfpqulxnkhblymc7aramjzajcvpptd4rjqd.onion/search?q={query}"),
    ("Excavator", "http://2fd6cemt4gmccflhm6imvdfvli3nf7zn6rfrwpsy7uhxrgbypvwf5fad.onion/search?query={query}"),
    ("Onionway", "http://oniwayzz74cv2puhsgx4dpjwieww4wdphsydqvf5q7eyz4myjvyw26ad.onion/search.php?s={query}"),
    ("Tor66", "http://tor66sewebgixwhcqfnp5inzp5x5uohhdy3kvtnyfxc2e5mxiuh34iid.onion/search?q={query}"),
    ("OSS", "http://3fzh7yuupdfyjhwt3ugzqqof6ulbcl27ecev33knxe3u7goi3vfn2qqd.onion/oss/index.php?search={query}"),
    ("Haystak", "http://haystak5njsmn2hqkewecpaxetahtwhsbsa64jom2k22z5afxhnpxfid.onion/?q={query}"),
    ("DarkSearch", "http://darksearchtkzcdjd6bvzylnjc5hshvzd3s26qxuqz5h2wfzp4buz5ad.onion/?q={query}"),
    ("Phobos", "http://phobos2nhokhtdavdsmqwdx6prdpj3kvxkypwobpawuzwzwkk4bnxhad.onion/search?q={query}"),
    ("Sentor", "http://sentor7gqrsbymixcvhlh7f46xptjmkjuq4cjllh4zr5sbcdkxhdid.onion/search?q={query}"),
    ("DarkHeart", "http://darkheart2kbqqyv7e4vndyy4v7htl36wbvxswdpnm5nhiwrz7s2yid.onion/search?q={query}"),
    ("OnionSearchEngine", "http://onionsearchengine.com/search.php?q={query}"),
];

/// Default list of search engines, in query order
pub fn default_engines() -> Vec<SearchEngine> {
    DEFAULT_ENDPOINTS
        .iter()
        .map(|(name, template)| SearchEngine::new(name, template))
        .collect()
}

/// Active engines from a configured list, preserving order
pub fn active_engines(engines: &[SearchEngine]) -> Vec<SearchEngine> {
    engines.iter().filter(|e| e.active).cloned().collect()
}
